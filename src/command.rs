use chrono::NaiveDate;
use serde::Deserialize;
use ulid::Ulid;

use crate::model::Timestamp;

/// One protocol request, decoded from a single JSON line tagged by `"op"`.
#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    CreateEvent {
        title: String,
        description: Option<String>,
        start: Timestamp,
        end: Timestamp,
    },
    UpdateEvent {
        id: Ulid,
        title: String,
        description: Option<String>,
        start: Timestamp,
        end: Timestamp,
    },
    DeleteEvent {
        id: Ulid,
    },
    GetEvent {
        id: Ulid,
    },
    ListEvents,
    CreateResource {
        name: String,
        #[serde(default)]
        resource_type: String,
    },
    UpdateResource {
        id: Ulid,
        name: String,
        #[serde(default)]
        resource_type: String,
    },
    DeleteResource {
        id: Ulid,
    },
    GetResource {
        id: Ulid,
    },
    ListResources,
    Allocate {
        event_id: Ulid,
        resource_id: Ulid,
    },
    Deallocate {
        id: Ulid,
    },
    GetAllocation {
        id: Ulid,
    },
    /// All allocations, or those of one resource or one event.
    ListAllocations {
        resource_id: Option<Ulid>,
        event_id: Option<Ulid>,
    },
    FindConflict {
        resource_id: Ulid,
        start: Timestamp,
        end: Timestamp,
        exclude_event_id: Option<Ulid>,
    },
    ListConflicts,
    Utilization {
        resource_ids: Option<Vec<Ulid>>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
}

#[derive(Debug)]
pub enum CommandError {
    Empty,
    Parse(String),
    Invalid(&'static str),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Empty => write!(f, "empty request"),
            CommandError::Parse(e) => write!(f, "malformed request: {e}"),
            CommandError::Invalid(msg) => write!(f, "invalid request: {msg}"),
        }
    }
}

impl std::error::Error for CommandError {}

pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(CommandError::Empty);
    }
    let cmd: Command =
        serde_json::from_str(trimmed).map_err(|e| CommandError::Parse(e.to_string()))?;
    if let Command::ListAllocations {
        resource_id: Some(_),
        event_id: Some(_),
    } = cmd
    {
        return Err(CommandError::Invalid(
            "list_allocations takes resource_id or event_id, not both",
        ));
    }
    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_create_event() {
        let line = r#"{"op":"create_event","title":"Standup","start":"2024-05-06T09:00:00","end":"2024-05-06T09:15:00"}"#;
        match parse_command(line).unwrap() {
            Command::CreateEvent {
                title,
                description,
                start,
                end,
            } => {
                assert_eq!(title, "Standup");
                assert_eq!(description, None);
                assert_eq!(start.to_string(), "2024-05-06 09:00:00");
                assert_eq!(end.to_string(), "2024-05-06 09:15:00");
            }
            cmd => panic!("expected CreateEvent, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_create_resource_defaults_type() {
        let cmd = parse_command(r#"{"op":"create_resource","name":"Room 101"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::CreateResource {
                name: "Room 101".into(),
                resource_type: String::new(),
            }
        );
    }

    #[test]
    fn parse_allocate() {
        let line = format!(r#"{{"op":"allocate","event_id":"{ID}","resource_id":"{ID}"}}"#);
        match parse_command(&line).unwrap() {
            Command::Allocate {
                event_id,
                resource_id,
            } => {
                assert_eq!(event_id.to_string(), ID);
                assert_eq!(resource_id.to_string(), ID);
            }
            cmd => panic!("expected Allocate, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_unit_commands() {
        assert_eq!(parse_command(r#"{"op":"list_events"}"#).unwrap(), Command::ListEvents);
        assert_eq!(
            parse_command(r#"{"op":"list_conflicts"}"#).unwrap(),
            Command::ListConflicts
        );
    }

    #[test]
    fn parse_utilization_dates() {
        let line = r#"{"op":"utilization","start_date":"2024-05-01","end_date":"2024-05-31"}"#;
        match parse_command(line).unwrap() {
            Command::Utilization {
                resource_ids,
                start_date,
                end_date,
            } => {
                assert_eq!(resource_ids, None);
                assert_eq!(start_date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
                assert_eq!(end_date, NaiveDate::from_ymd_opt(2024, 5, 31).unwrap());
            }
            cmd => panic!("expected Utilization, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_find_conflict_with_exclusion() {
        let line = format!(
            r#"{{"op":"find_conflict","resource_id":"{ID}","start":"2024-05-06T09:00:00","end":"2024-05-06T10:00:00","exclude_event_id":"{ID}"}}"#
        );
        match parse_command(&line).unwrap() {
            Command::FindConflict {
                exclude_event_id, ..
            } => assert_eq!(exclude_event_id.map(|id| id.to_string()).as_deref(), Some(ID)),
            cmd => panic!("expected FindConflict, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_rejects_empty() {
        assert!(matches!(parse_command("   "), Err(CommandError::Empty)));
    }

    #[test]
    fn parse_rejects_unknown_op() {
        assert!(matches!(
            parse_command(r#"{"op":"drop_everything"}"#),
            Err(CommandError::Parse(_))
        ));
    }

    #[test]
    fn parse_rejects_bad_timestamp() {
        let line = r#"{"op":"create_event","title":"x","start":"yesterday","end":"2024-05-06T09:15:00"}"#;
        assert!(matches!(parse_command(line), Err(CommandError::Parse(_))));
    }

    #[test]
    fn parse_rejects_bad_ulid() {
        let line = r#"{"op":"get_event","id":"not-a-ulid"}"#;
        assert!(matches!(parse_command(line), Err(CommandError::Parse(_))));
    }

    #[test]
    fn parse_rejects_double_filter() {
        let line = format!(r#"{{"op":"list_allocations","resource_id":"{ID}","event_id":"{ID}"}}"#);
        assert!(matches!(parse_command(&line), Err(CommandError::Invalid(_))));
    }
}
