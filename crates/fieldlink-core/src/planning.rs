//! Planning payloads sent by the desktop device.
//!
//! A planning payload is a list of action groups. Each group carries one
//! team together with the equipment it works on and the actions scheduled
//! for it. Unlike a full entity graph, a planning payload does not carry an
//! event: it is applied to an event the operator selected beforehand.

use serde::{Deserialize, Serialize};

use crate::graph::{ActionRecord, CoordinateRecord, EquipmentRecord, RejectedEntity, TeamRecord};

/// One team and the work planned for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionGroup {
    /// Groups without a team are skipped on import.
    #[serde(default)]
    pub team: Option<TeamRecord>,
    #[serde(default)]
    pub equipment: Vec<EquipmentRecord>,
    /// Legacy group-level coordinates, each naming its own equipment.
    #[serde(default)]
    pub coordinates: Vec<CoordinateRecord>,
    #[serde(default)]
    pub actions: Vec<ActionRecord>,
}

impl ActionGroup {
    pub fn for_team(team: TeamRecord) -> Self {
        Self {
            team: Some(team),
            equipment: Vec::new(),
            coordinates: Vec::new(),
            actions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanningPayload {
    pub groups: Vec<ActionGroup>,
    /// Groups or group children that could not be decoded.
    #[serde(skip)]
    pub rejected: Vec<RejectedEntity>,
}

impl PlanningPayload {
    pub fn new(groups: Vec<ActionGroup>) -> Self {
        Self {
            groups,
            rejected: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn action_count(&self) -> usize {
        self.groups.iter().map(|g| g.actions.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_is_a_bare_array() {
        let payload: PlanningPayload = serde_json::from_value(json!([
            {"team": {"id": "T1", "event_id": "E1"}, "actions": [{"id": "A1"}]},
            {"actions": [{"id": "A2"}, {"id": "A3"}]}
        ]))
        .unwrap();
        assert_eq!(payload.groups.len(), 2);
        assert!(payload.groups[1].team.is_none());
        assert_eq!(payload.action_count(), 3);
    }
}
