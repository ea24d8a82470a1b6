//! Explicit fleet and grid topology.
//!
//! A [`Topology`] says which batteries and forecast sources share a grid
//! connection point. Each [`Site`] gets its own power balance and its own
//! import/export limits; the market price is common to all sites.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::devices::{Battery, BatteryId};
use crate::error::ScheduleError;
use crate::forecast::{SourceId, SourceKind};

/// Site name used by [`Topology::single_site`].
pub const DEFAULT_SITE: &str = "main";

/// Import/export limits at a site's grid connection point.
///
/// `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GridConnection {
    /// Maximum power drawn from the grid (kW).
    pub max_import_kw: Option<f64>,
    /// Maximum power fed into the grid (kW, positive magnitude).
    pub max_export_kw: Option<f64>,
}

impl GridConnection {
    /// A connection without import or export limits.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// A connection with both limits set.
    pub fn with_limits(max_import_kw: f64, max_export_kw: f64) -> Self {
        Self {
            max_import_kw: Some(max_import_kw),
            max_export_kw: Some(max_export_kw),
        }
    }

    fn validate(&self, site: &str) -> Result<(), ScheduleError> {
        let limits = [
            ("import", self.max_import_kw),
            ("export", self.max_export_kw),
        ];
        for (direction, limit) in limits {
            match limit {
                Some(kw) if !(kw.is_finite() && kw >= 0.0) => {
                    return Err(ScheduleError::InvalidTopology(format!(
                        "site `{site}` has an invalid {direction} limit {kw} kW"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// One grid connection point with the assets behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub grid: GridConnection,
    pub batteries: Vec<BatteryId>,
    /// Generation sources, summed step by step.
    pub generation: Vec<SourceId>,
    /// Load sources, summed step by step.
    pub load: Vec<SourceId>,
}

impl Site {
    pub fn new(id: impl Into<String>, grid: GridConnection) -> Self {
        Self {
            id: id.into(),
            grid,
            batteries: Vec::new(),
            generation: Vec::new(),
            load: Vec::new(),
        }
    }
}

/// The sites the fleet is spread over, plus the shared price signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub sites: Vec<Site>,
    pub price: SourceId,
}

impl Topology {
    /// One unlimited site holding the whole fleet and every forecast source.
    ///
    /// All solar and wind sources feed generation, all load sources feed
    /// load, and the first market source (in source id order) is the price.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidTopology`] if no market source exists.
    pub fn single_site<'a>(
        fleet: &[Battery],
        sources: impl IntoIterator<Item = &'a SourceId>,
    ) -> Result<Self, ScheduleError> {
        let mut site = Site::new(DEFAULT_SITE, GridConnection::unlimited());
        site.batteries = fleet.iter().map(|b| b.id.clone()).collect();

        let mut price = None;
        for id in sources {
            match id.kind {
                SourceKind::Solar | SourceKind::Wind => site.generation.push(id.clone()),
                SourceKind::Load => site.load.push(id.clone()),
                SourceKind::Market => {
                    price.get_or_insert_with(|| id.clone());
                }
            }
        }
        let price = price.ok_or_else(|| {
            ScheduleError::InvalidTopology("no market price forecast supplied".into())
        })?;

        Ok(Self {
            sites: vec![site],
            price,
        })
    }

    /// Checks that sites, batteries and sources fit together.
    ///
    /// Every battery of the fleet must be assigned to exactly one site, every
    /// battery named by a site must exist, and every source must be of the
    /// kind its role requires.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidTopology`] describing the first problem.
    pub fn validate(&self, fleet: &[Battery]) -> Result<(), ScheduleError> {
        let invalid = |msg: String| Err(ScheduleError::InvalidTopology(msg));

        if self.sites.is_empty() {
            return invalid("at least one site is required".into());
        }
        if self.price.kind != SourceKind::Market {
            return invalid(format!("price source `{}` is not a market source", self.price));
        }

        let mut fleet_ids = BTreeSet::new();
        for battery in fleet {
            if !fleet_ids.insert(&battery.id) {
                return invalid(format!("battery `{}` appears twice in the fleet", battery.id));
            }
        }

        let mut site_ids = BTreeSet::new();
        let mut assigned = BTreeSet::new();
        for site in &self.sites {
            if site.id.is_empty() {
                return invalid("site id must not be empty".into());
            }
            if !site_ids.insert(site.id.as_str()) {
                return invalid(format!("site `{}` is declared twice", site.id));
            }
            site.grid.validate(&site.id)?;

            for battery in &site.batteries {
                if !fleet_ids.contains(battery) {
                    return invalid(format!(
                        "site `{}` references unknown battery `{battery}`",
                        site.id
                    ));
                }
                if !assigned.insert(battery) {
                    return invalid(format!("battery `{battery}` is assigned to several sites"));
                }
            }
            if let Some(source) = site.generation.iter().find(|s| !s.kind.is_generation()) {
                return invalid(format!(
                    "site `{}` lists `{source}` as generation",
                    site.id
                ));
            }
            if let Some(source) = site.load.iter().find(|s| s.kind != SourceKind::Load) {
                return invalid(format!("site `{}` lists `{source}` as load", site.id));
            }
        }

        if let Some(unassigned) = fleet_ids.difference(&assigned).next() {
            return invalid(format!("battery `{unassigned}` is not assigned to any site"));
        }
        Ok(())
    }

    /// Index of the site holding `battery`.
    pub fn site_of(&self, battery: &BatteryId) -> Option<usize> {
        self.sites
            .iter()
            .position(|site| site.batteries.contains(battery))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet() -> Vec<Battery> {
        vec![
            Battery::new("a", 10.0, 5.0, 5.0, 5.0, 0.9).unwrap(),
            Battery::new("b", 20.0, 5.0, 5.0, 5.0, 0.9).unwrap(),
        ]
    }

    fn sources() -> Vec<SourceId> {
        vec![
            SourceId::solar("roof"),
            SourceId::wind("ridge"),
            SourceId::load("house"),
            SourceId::market("day-ahead"),
            SourceId::market("intraday"),
        ]
    }

    #[test]
    fn single_site_holds_everything() {
        let topology = Topology::single_site(&fleet(), &sources()).unwrap();
        assert_eq!(topology.sites.len(), 1);
        let site = &topology.sites[0];
        assert_eq!(site.id, DEFAULT_SITE);
        assert_eq!(site.batteries.len(), 2);
        assert_eq!(site.generation, vec![SourceId::solar("roof"), SourceId::wind("ridge")]);
        assert_eq!(site.load, vec![SourceId::load("house")]);
        assert_eq!(topology.price, SourceId::market("day-ahead"));
        assert_eq!(site.grid, GridConnection::unlimited());
        assert!(topology.validate(&fleet()).is_ok());
    }

    #[test]
    fn single_site_requires_a_price() {
        let err = Topology::single_site(&fleet(), &[SourceId::load("house")]).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidTopology(_)));
    }

    fn two_sites() -> Topology {
        let mut north = Site::new("north", GridConnection::with_limits(10.0, 2.0));
        north.batteries.push(BatteryId::from("a"));
        north.generation.push(SourceId::solar("roof"));
        let mut south = Site::new("south", GridConnection::unlimited());
        south.batteries.push(BatteryId::from("b"));
        south.load.push(SourceId::load("house"));
        Topology {
            sites: vec![north, south],
            price: SourceId::market("day-ahead"),
        }
    }

    #[test]
    fn two_sites_are_valid() {
        let topology = two_sites();
        assert!(topology.validate(&fleet()).is_ok());
        assert_eq!(topology.site_of(&BatteryId::from("b")), Some(1));
        assert_eq!(topology.site_of(&BatteryId::from("zz")), None);
    }

    #[test]
    fn unassigned_battery_is_rejected() {
        let mut topology = two_sites();
        topology.sites[1].batteries.clear();
        let err = topology.validate(&fleet()).unwrap_err();
        assert!(err.to_string().contains("`b` is not assigned"));
    }

    #[test]
    fn doubly_assigned_battery_is_rejected() {
        let mut topology = two_sites();
        topology.sites[1].batteries.push(BatteryId::from("a"));
        assert!(topology.validate(&fleet()).is_err());
    }

    #[test]
    fn unknown_battery_is_rejected() {
        let mut topology = two_sites();
        topology.sites[0].batteries.push(BatteryId::from("ghost"));
        assert!(topology.validate(&fleet()).is_err());
    }

    #[test]
    fn wrong_source_roles_are_rejected() {
        let mut topology = two_sites();
        topology.sites[0].generation.push(SourceId::load("house"));
        assert!(topology.validate(&fleet()).is_err());

        let mut topology = two_sites();
        topology.price = SourceId::load("house");
        assert!(topology.validate(&fleet()).is_err());
    }

    #[test]
    fn negative_limit_is_rejected() {
        let mut topology = two_sites();
        topology.sites[0].grid.max_export_kw = Some(-1.0);
        assert!(topology.validate(&fleet()).is_err());
    }

    #[test]
    fn duplicate_site_is_rejected() {
        let mut topology = two_sites();
        topology.sites[1].id = "north".into();
        assert!(topology.validate(&fleet()).is_err());
    }
}
