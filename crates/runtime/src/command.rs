//! The type-erased command envelope.

use serde::{Deserialize, Serialize};

use crate::aggregate::CommandPayload;
use crate::error::RuntimeError;

/// A command as the runtime sees it: a routing type, the target identifier
/// and the payload, all type-erased.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Routing key for the registered handler.
    pub command_type: String,

    /// Identifier the command targets; the registered aggregate definition
    /// turns it into event criteria.
    pub target: serde_json::Value,

    /// The command payload as JSON.
    pub payload: serde_json::Value,
}

/// Outcome of handling a command: the handler's result payload, or an error.
pub type CommandResult = Result<serde_json::Value, RuntimeError>;

impl Command {
    /// Creates a command from raw parts.
    pub fn new(
        command_type: impl Into<String>,
        target: serde_json::Value,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            command_type: command_type.into(),
            target,
            payload,
        }
    }

    /// Encodes a typed command.
    pub fn from_payload<C: CommandPayload>(command: &C) -> Result<Self, serde_json::Error> {
        Ok(Self {
            command_type: C::COMMAND_TYPE.to_string(),
            target: serde_json::to_value(command.target())?,
            payload: serde_json::to_value(command)?,
        })
    }

    /// Decodes the payload into a typed command.
    pub fn decode<C: CommandPayload>(&self) -> Result<C, RuntimeError> {
        C::deserialize(&self.payload).map_err(|e| RuntimeError::InvalidCommand {
            command_type: self.command_type.clone(),
            reason: e.to_string(),
        })
    }

    /// Decodes the target identifier.
    pub fn decode_target<T: for<'de> Deserialize<'de>>(&self) -> Result<T, RuntimeError> {
        T::deserialize(&self.target).map_err(|e| RuntimeError::InvalidCommand {
            command_type: self.command_type.clone(),
            reason: format!("bad target: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Target {
        id: String,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Rename {
        id: String,
        name: String,
    }

    impl CommandPayload for Rename {
        const COMMAND_TYPE: &'static str = "Rename";
        type Target = Target;

        fn target(&self) -> Target {
            Target {
                id: self.id.clone(),
            }
        }
    }

    #[test]
    fn from_payload_derives_type_and_target() {
        let command = Command::from_payload(&Rename {
            id: "1".into(),
            name: "lamp".into(),
        })
        .unwrap();

        assert_eq!(command.command_type, "Rename");
        assert_eq!(command.target, serde_json::json!({"id": "1"}));
        assert_eq!(
            command.decode::<Rename>().unwrap(),
            Rename {
                id: "1".into(),
                name: "lamp".into()
            }
        );
        assert_eq!(
            command.decode_target::<Target>().unwrap(),
            Target { id: "1".into() }
        );
    }

    #[test]
    fn mismatched_payload_is_invalid_command() {
        let command = Command::new(
            "Rename",
            serde_json::json!({"id": "1"}),
            serde_json::json!({"unexpected": true}),
        );

        match command.decode::<Rename>() {
            Err(RuntimeError::InvalidCommand { command_type, .. }) => {
                assert_eq!(command_type, "Rename")
            }
            other => panic!("expected invalid command, got {other:?}"),
        }
        assert!(command.decode_target::<Vec<u8>>().is_err());
    }
}
