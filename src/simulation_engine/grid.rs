use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::SimConfig;
use crate::simulation_engine::intersection::Intersection;
use crate::simulation_engine::signal::Direction;

/// A street segment between intersections (or leading out of the grid).
#[derive(Debug, Clone)]
pub struct Street {
    pub id: String,
    /// Length in abstract units; vehicles advance by speed / length per tick.
    pub length: f64,
    pub two_way: bool,
    /// Travel direction for one-way streets, `None` for two-way.
    pub direction: Option<Direction>,
}

impl Street {
    pub fn two_way(id: impl Into<String>, length: f64) -> Self {
        Self {
            id: id.into(),
            length,
            two_way: true,
            direction: None,
        }
    }

    pub fn one_way(id: impl Into<String>, length: f64, direction: Direction) -> Self {
        Self {
            id: id.into(),
            length,
            two_way: false,
            direction: Some(direction),
        }
    }
}

/// Which end of a street a connection wires to an intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    /// Traffic on the street arrives at the intersection from `direction`;
    /// wiring this creates the approach's traffic light.
    Incoming,
    /// Traffic departs the intersection onto the street towards `direction`.
    Outgoing,
}

#[derive(Debug)]
pub enum GridError {
    UnknownStreet(String),
    UnknownIntersection(String),
    /// A one-way street wired against its travel direction.
    WrongWay {
        street: String,
        direction: Direction,
    },
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridError::UnknownStreet(id) => write!(f, "unknown street: {}", id),
            GridError::UnknownIntersection(id) => write!(f, "unknown intersection: {}", id),
            GridError::WrongWay { street, direction } => write!(
                f,
                "one-way street {} cannot be wired at the {:?} side",
                street, direction
            ),
        }
    }
}

impl std::error::Error for GridError {}

/// The road network: intersections, streets, and how they connect.
///
/// Built once at setup time; afterwards read-only, so vehicle tasks share it
/// behind a plain `Arc` with no locking.
pub struct TrafficGrid {
    intersections: HashMap<String, Arc<Intersection>>,
    streets: HashMap<String, Arc<Street>>,
    /// Intersection id -> (arrival direction, street id).
    incoming: HashMap<String, Vec<(Direction, String)>>,
    /// Intersection id -> (departure direction, street id).
    outgoing: HashMap<String, Vec<(Direction, String)>>,
    /// Street id -> intersection ids it touches.
    street_ends: HashMap<String, Vec<String>>,
}

impl TrafficGrid {
    pub fn new() -> Self {
        Self {
            intersections: HashMap::new(),
            streets: HashMap::new(),
            incoming: HashMap::new(),
            outgoing: HashMap::new(),
            street_ends: HashMap::new(),
        }
    }

    pub fn add_intersection(&mut self, intersection: Intersection) -> Arc<Intersection> {
        let intersection = Arc::new(intersection);
        self.intersections
            .insert(intersection.id.clone(), Arc::clone(&intersection));
        intersection
    }

    pub fn add_street(&mut self, street: Street) -> Arc<Street> {
        let street = Arc::new(street);
        self.streets.insert(street.id.clone(), Arc::clone(&street));
        self.street_ends.entry(street.id.clone()).or_default();
        street
    }

    /// Wires a street to an intersection. An `Incoming` attachment creates
    /// the traffic light for that approach direction if it does not exist.
    pub fn connect_street(
        &mut self,
        street_id: &str,
        intersection_id: &str,
        direction: Direction,
        attachment: Attachment,
        cfg: &SimConfig,
    ) -> Result<(), GridError> {
        let street = self
            .streets
            .get(street_id)
            .ok_or_else(|| GridError::UnknownStreet(street_id.to_string()))?;
        // On a one-way street traffic arrives at the opposite side of its
        // travel direction and departs on the travel direction itself.
        if let Some(travel) = street.direction {
            let expected = match attachment {
                Attachment::Incoming => travel.opposite(),
                Attachment::Outgoing => travel,
            };
            if direction != expected {
                return Err(GridError::WrongWay {
                    street: street_id.to_string(),
                    direction,
                });
            }
        }
        let intersection = self
            .intersections
            .get(intersection_id)
            .ok_or_else(|| GridError::UnknownIntersection(intersection_id.to_string()))?;

        let ends = self.street_ends.entry(street_id.to_string()).or_default();
        if !ends.iter().any(|id| id == intersection_id) {
            ends.push(intersection_id.to_string());
        }

        match attachment {
            Attachment::Incoming => {
                intersection.add_approach(direction, cfg);
                self.incoming
                    .entry(intersection_id.to_string())
                    .or_default()
                    .push((direction, street_id.to_string()));
            }
            Attachment::Outgoing => {
                self.outgoing
                    .entry(intersection_id.to_string())
                    .or_default()
                    .push((direction, street_id.to_string()));
            }
        }
        log::debug!(
            "street {} wired {:?} at intersection {} towards {:?}",
            street_id,
            attachment,
            intersection_id,
            direction
        );
        Ok(())
    }

    /// Resolves which approach direction governs an arrival from the given
    /// street. `None` is a reportable error for the vehicle, not a crash.
    pub fn arrival_direction_for(
        &self,
        intersection_id: &str,
        previous_street: Option<&str>,
    ) -> Option<Direction> {
        let prev = previous_street?;
        self.incoming
            .get(intersection_id)?
            .iter()
            .find(|(_, street)| street == prev)
            .map(|(direction, _)| *direction)
    }

    /// Candidate departure streets after passing through an intersection.
    ///
    /// Exits opposite the arrival direction (U-turns) are excluded unless
    /// `allow_u_turns` is set, but reappear as a fallback when nothing else
    /// connects, so a dead end does not strand the vehicle.
    pub fn exits_from(
        &self,
        intersection_id: &str,
        arrival: Option<Direction>,
        allow_u_turns: bool,
    ) -> Vec<Arc<Street>> {
        let Some(outgoing) = self.outgoing.get(intersection_id) else {
            return Vec::new();
        };
        let u_turn = arrival.map(|d| d.opposite());

        let mut exits: Vec<Arc<Street>> = outgoing
            .iter()
            .filter(|(direction, _)| allow_u_turns || u_turn != Some(*direction))
            .filter_map(|(_, street)| self.streets.get(street).cloned())
            .collect();

        if exits.is_empty() {
            exits = outgoing
                .iter()
                .filter_map(|(_, street)| self.streets.get(street).cloned())
                .collect();
        }
        exits
    }

    pub fn intersections_connected_to(&self, street_id: &str) -> Vec<Arc<Intersection>> {
        self.street_ends
            .get(street_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.intersections.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn intersection(&self, id: &str) -> Option<Arc<Intersection>> {
        self.intersections.get(id).cloned()
    }

    pub fn street(&self, id: &str) -> Option<Arc<Street>> {
        self.streets.get(id).cloned()
    }

    pub fn streets(&self) -> Vec<Arc<Street>> {
        self.streets.values().cloned().collect()
    }

    pub fn intersections(&self) -> Vec<Arc<Intersection>> {
        self.intersections.values().cloned().collect()
    }
}

impl Default for TrafficGrid {
    fn default() -> Self {
        Self::new()
    }
}
