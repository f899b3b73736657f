//! Deterministic MILP/LP problem representation.
//!
//! Phase builders emit variables and constraints into a [`Problem`] in
//! canonical order; the solver adapter consumes it and the LP writer
//! serializes it byte-identically for a fixed input, independent of
//! the solver backend.

use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VarId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VarKind {
    Binary,
    Continuous { lb: f64, ub: f64 },
}

#[derive(Debug, Clone)]
pub struct VarDef {
    pub name: String,
    pub kind: VarKind,
}

/// A linear expression `Σ coefᵢ·varᵢ + constant`.
#[derive(Debug, Clone, Default)]
pub struct LinExpr {
    pub terms: Vec<(VarId, f64)>,
    pub constant: f64,
}

impl LinExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constant(value: f64) -> Self {
        Self {
            terms: Vec::new(),
            constant: value,
        }
    }

    pub fn term(var: VarId, coef: f64) -> Self {
        Self {
            terms: vec![(var, coef)],
            constant: 0.0,
        }
    }

    pub fn add_term(&mut self, var: VarId, coef: f64) -> &mut Self {
        self.terms.push((var, coef));
        self
    }

    pub fn add_constant(&mut self, value: f64) -> &mut Self {
        self.constant += value;
        self
    }

    pub fn add_expr(&mut self, other: &LinExpr, scale: f64) -> &mut Self {
        for &(var, coef) in &other.terms {
            self.terms.push((var, coef * scale));
        }
        self.constant += other.constant * scale;
        self
    }

    pub fn is_constant(&self) -> bool {
        self.simplified().is_empty()
    }

    /// Terms merged by variable and stripped of zeros, in variable
    /// creation order.
    pub fn simplified(&self) -> Vec<(VarId, f64)> {
        let mut merged: Vec<(VarId, f64)> = Vec::new();
        let mut sorted = self.terms.clone();
        sorted.sort_by_key(|&(var, _)| var);
        for (var, coef) in sorted {
            match merged.last_mut() {
                Some((last, total)) if *last == var => *total += coef,
                _ => merged.push((var, coef)),
            }
        }
        merged.retain(|&(_, coef)| coef != 0.0);
        merged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Le,
    Ge,
    Eq,
}

#[derive(Debug, Clone)]
pub struct ConstraintDef {
    pub expr: LinExpr,
    pub cmp: Cmp,
    pub rhs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Minimize,
    Maximize,
}

/// A full problem instance.
#[derive(Debug, Clone)]
pub struct Problem {
    pub name: String,
    pub vars: Vec<VarDef>,
    pub constraints: Vec<ConstraintDef>,
    pub sense: Sense,
    pub objective: LinExpr,
}

impl Problem {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            vars: Vec::new(),
            constraints: Vec::new(),
            sense: Sense::Minimize,
            objective: LinExpr::new(),
        }
    }

    pub fn add_binary(&mut self, name: String) -> VarId {
        self.vars.push(VarDef {
            name,
            kind: VarKind::Binary,
        });
        VarId(self.vars.len() - 1)
    }

    pub fn add_continuous(&mut self, name: String, lb: f64, ub: f64) -> VarId {
        self.vars.push(VarDef {
            name,
            kind: VarKind::Continuous { lb, ub },
        });
        VarId(self.vars.len() - 1)
    }

    /// Adds `expr cmp rhs`; constant terms migrate to the right side.
    pub fn constrain(&mut self, expr: LinExpr, cmp: Cmp, rhs: f64) {
        let adjusted_rhs = rhs - expr.constant;
        let expr = LinExpr {
            terms: expr.terms,
            constant: 0.0,
        };
        self.constraints.push(ConstraintDef {
            expr,
            cmp,
            rhs: adjusted_rhs,
        });
    }

    pub fn set_objective(&mut self, sense: Sense, objective: LinExpr) {
        self.sense = sense;
        self.objective = objective;
    }

    /// Writes the problem in CPLEX LP format.
    ///
    /// Output is byte-identical for equal problems: variables and
    /// constraints appear in creation order, coefficients in variable
    /// creation order, numbers through Rust's shortest-roundtrip float
    /// formatting.
    pub fn write_lp<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "\\ Problem: {}", self.name)?;
        writeln!(
            out,
            "{}",
            match self.sense {
                Sense::Minimize => "Minimize",
                Sense::Maximize => "Maximize",
            }
        )?;
        write!(out, " obj:")?;
        self.write_expr(out, &self.objective)?;
        writeln!(out)?;

        writeln!(out, "Subject To")?;
        for (index, constraint) in self.constraints.iter().enumerate() {
            write!(out, " c{index}:")?;
            self.write_expr(out, &constraint.expr)?;
            let cmp = match constraint.cmp {
                Cmp::Le => "<=",
                Cmp::Ge => ">=",
                Cmp::Eq => "=",
            };
            writeln!(out, " {cmp} {}", constraint.rhs)?;
        }

        writeln!(out, "Bounds")?;
        for var in &self.vars {
            if let VarKind::Continuous { lb, ub } = var.kind {
                let name = &var.name;
                if ub == f64::INFINITY {
                    writeln!(out, " {lb} <= {name}")?;
                } else {
                    writeln!(out, " {lb} <= {name} <= {ub}")?;
                }
            }
        }

        let binaries: Vec<&str> = self
            .vars
            .iter()
            .filter(|var| var.kind == VarKind::Binary)
            .map(|var| var.name.as_str())
            .collect();
        if !binaries.is_empty() {
            writeln!(out, "Binaries")?;
            for name in binaries {
                writeln!(out, " {name}")?;
            }
        }
        writeln!(out, "End")?;
        Ok(())
    }

    fn write_expr<W: Write>(&self, out: &mut W, expr: &LinExpr) -> io::Result<()> {
        let terms = expr.simplified();
        if terms.is_empty() {
            write!(out, " 0")?;
            return Ok(());
        }
        for (position, (var, coef)) in terms.iter().enumerate() {
            let name = &self.vars[var.0].name;
            let magnitude = coef.abs();
            if position == 0 {
                if *coef < 0.0 {
                    write!(out, " - {magnitude} {name}")?;
                } else {
                    write!(out, " {magnitude} {name}")?;
                }
            } else if *coef < 0.0 {
                write!(out, " - {magnitude} {name}")?;
            } else {
                write!(out, " + {magnitude} {name}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Cmp, LinExpr, Problem, Sense};

    fn toy_problem() -> Problem {
        let mut problem = Problem::new("toy");
        let x = problem.add_binary("x".into());
        let y = problem.add_continuous("y".into(), 0.0, 5.0);
        let mut objective = LinExpr::new();
        objective.add_term(x, 2.0).add_term(y, 1.0);
        problem.set_objective(Sense::Maximize, objective);
        let mut expr = LinExpr::new();
        expr.add_term(x, 1.0).add_term(y, 1.0).add_constant(1.0);
        problem.constrain(expr, Cmp::Le, 4.0);
        problem
    }

    #[test]
    fn test_constant_moves_to_rhs() {
        let problem = toy_problem();
        assert_eq!(problem.constraints[0].rhs, 3.0);
        assert_eq!(problem.constraints[0].expr.constant, 0.0);
    }

    #[test]
    fn test_simplify_merges_terms() {
        let mut problem = Problem::new("merge");
        let x = problem.add_continuous("x".into(), 0.0, 1.0);
        let y = problem.add_continuous("y".into(), 0.0, 1.0);
        let mut expr = LinExpr::new();
        expr.add_term(x, 1.0)
            .add_term(y, 2.0)
            .add_term(x, 3.0)
            .add_term(y, -2.0);
        assert_eq!(expr.simplified(), vec![(x, 4.0)]);
    }

    #[test]
    fn test_lp_output_is_stable() {
        let mut first = Vec::new();
        toy_problem().write_lp(&mut first).unwrap();
        let mut second = Vec::new();
        toy_problem().write_lp(&mut second).unwrap();
        assert_eq!(first, second);

        let text = String::from_utf8(first).unwrap();
        assert!(text.starts_with("\\ Problem: toy\nMaximize\n obj: 2 x + 1 y\n"));
        assert!(text.contains("Subject To\n c0: 1 x + 1 y <= 3\n"));
        assert!(text.contains("Binaries\n x\n"));
        assert!(text.ends_with("End\n"));
    }
}
