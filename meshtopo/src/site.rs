//! Installation sites.

use crate::{
    ids::{canon_f64, stable_id},
    Polarity, Status,
};
use geo::geometry::Coord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SiteKind {
    /// Client node: terminal site serving a subscriber.
    Cn,
    /// Distribution node: mesh-forwarding site.
    Dn,
    /// Point of presence: bridges the mesh to the backbone.
    Pop,
}

impl SiteKind {
    pub fn is_distribution(self) -> bool {
        matches!(self, SiteKind::Dn | SiteKind::Pop)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SiteKind::Cn => "CN",
            SiteKind::Dn => "DN",
            SiteKind::Pop => "POP",
        }
    }
}

/// A geographic installation site.
///
/// Kind, location and device SKU are the key attributes: they drive
/// the id and never change after construction. Build a new site to
/// alter them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    id: String,
    kind: SiteKind,
    /// Longitude/latitude in degrees.
    lonlat: Coord<f64>,
    /// Projected position in meters.
    xy: Coord<f64>,
    altitude_m: f64,
    device_sku: String,
    pub status: Status,
    pub polarity: Polarity,
    pub building_id: Option<u32>,
    pub name: String,
    pub number_of_subscribers: Option<u32>,
}

impl Site {
    pub fn new(
        kind: SiteKind,
        lonlat: Coord<f64>,
        xy: Coord<f64>,
        altitude_m: f64,
        device_sku: &str,
        status: Status,
    ) -> Self {
        let id = stable_id(&[
            kind.as_str(),
            &canon_f64(lonlat.y),
            &canon_f64(lonlat.x),
            &canon_f64(altitude_m),
            device_sku,
        ]);
        Self {
            id,
            kind,
            lonlat,
            xy,
            altitude_m,
            device_sku: device_sku.to_owned(),
            status,
            polarity: Polarity::Unassigned,
            building_id: None,
            name: String::new(),
            number_of_subscribers: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> SiteKind {
        self.kind
    }

    pub fn lonlat(&self) -> Coord<f64> {
        self.lonlat
    }

    pub fn xy(&self) -> Coord<f64> {
        self.xy
    }

    pub fn altitude_m(&self) -> f64 {
        self.altitude_m
    }

    pub fn device_sku(&self) -> &str {
        &self.device_sku
    }

    /// Key for co-location checks: the exact geographic position.
    pub fn location_key(&self) -> (i64, i64, i64) {
        (
            (self.lonlat.x * 1e9).round() as i64,
            (self.lonlat.y * 1e9).round() as i64,
            (self.altitude_m * 1e3).round() as i64,
        )
    }

    /// Subscriber multiplicity used by the CN demand model.
    pub fn subscriber_count(&self) -> u32 {
        if self.kind == SiteKind::Cn {
            self.number_of_subscribers.unwrap_or(1).max(1)
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Coord, Site, SiteKind, Status};

    fn site(kind: SiteKind, lon: f64, sku: &str) -> Site {
        Site::new(
            kind,
            Coord { x: lon, y: 44.0 },
            Coord { x: 0.0, y: 0.0 },
            12.0,
            sku,
            Status::Candidate,
        )
    }

    #[test]
    fn test_id_depends_on_key_attributes_only() {
        let mut a = site(SiteKind::Dn, -71.0, "dn1");
        let b = site(SiteKind::Dn, -71.0, "dn1");
        assert_eq!(a.id(), b.id());

        a.status = Status::Proposed;
        a.name = "roof-3".into();
        assert_eq!(a.id(), b.id());

        assert_ne!(site(SiteKind::Dn, -71.0, "dn2").id(), b.id());
        assert_ne!(site(SiteKind::Pop, -71.0, "dn1").id(), b.id());
        assert_ne!(site(SiteKind::Dn, -71.5, "dn1").id(), b.id());
    }

    #[test]
    fn test_subscriber_count() {
        let mut cn = site(SiteKind::Cn, -71.0, "cn1");
        assert_eq!(cn.subscriber_count(), 1);
        cn.number_of_subscribers = Some(12);
        assert_eq!(cn.subscriber_count(), 12);

        let mut dn = site(SiteKind::Dn, -71.0, "dn1");
        dn.number_of_subscribers = Some(12);
        assert_eq!(dn.subscriber_count(), 0);
    }
}
