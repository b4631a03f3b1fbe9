use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchState {
    Init,
    InProgress,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Init => "INIT",
            BatchState::InProgress => "IN_PROGRESS",
        }
    }

    pub fn parse_state(s: &str) -> Option<Self> {
        match s {
            "INIT" => Some(BatchState::Init),
            "IN_PROGRESS" => Some(BatchState::InProgress),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Platform {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: i64,
    pub user_id: i64,
    pub create_time: DateTime<Utc>,
    pub name: String,
    pub app_id: i64,
    pub njobs: i64,
    pub state: BatchState,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_strings_round_trip() {
        for s in [BatchState::Init, BatchState::InProgress] {
            assert_eq!(BatchState::parse_state(s.as_str()), Some(s));
        }
        assert_eq!(BatchState::parse_state("DONE"), None);
        assert_eq!(
            serde_json::to_string(&BatchState::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
    }
}
