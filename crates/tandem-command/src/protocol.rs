use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tandem_frame::Uid;

/// Channel carrying invocation requests to the peer's control loop.
pub const EXECUTE_CHANNEL: &str = "tandem:Execute";

/// Channel carrying remote results back to the initiating side.
pub const RESULT_CHANNEL: &str = "tandem:Execute#results";

/// Fully qualified instance name: which operation, and which run of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fqin {
    /// Qualified operation name, `plugin:Operation`.
    pub name: String,
    pub uid: Uid,
}

impl Fqin {
    pub fn new(name: impl Into<String>, uid: Uid) -> Self {
        Self {
            name: name.into(),
            uid,
        }
    }

    /// Name of the invocation's private channel.
    pub fn channel_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Fqin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.uid)
    }
}

/// Sent on [`EXECUTE_CHANNEL`] to start the remote half of an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub fqin: Fqin,
    pub params: Value,
}

/// Outcome of one remote half, sent on [`RESULT_CHANNEL`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResult {
    pub fqin: Fqin,
    pub result: Option<Value>,
    pub failed: bool,
    pub traceback: Option<String>,
}

impl RemoteResult {
    pub fn success(fqin: Fqin, value: Value) -> Self {
        Self {
            fqin,
            result: Some(value),
            failed: false,
            traceback: None,
        }
    }

    pub fn failure(fqin: Fqin, traceback: String) -> Self {
        Self {
            fqin,
            result: None,
            failed: true,
            traceback: Some(traceback),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name_derived_from_fqin() {
        let uid = Uid::new();
        let fqin = Fqin::new("demo:Echo", uid);
        assert_eq!(fqin.channel_name(), format!("demo:Echo/{uid}"));
    }

    #[test]
    fn test_remote_result_json_shape() {
        let fqin = Fqin::new("demo:Echo", Uid::new());
        let ok =
            serde_json::to_value(RemoteResult::success(fqin.clone(), Value::Bool(true))).unwrap();
        assert_eq!(ok["failed"], Value::Bool(false));
        assert_eq!(ok["result"], Value::Bool(true));
        assert_eq!(ok["fqin"]["name"], "demo:Echo");

        let failed = RemoteResult::failure(fqin, "boom".into());
        let back: RemoteResult =
            serde_json::from_value(serde_json::to_value(&failed).unwrap()).unwrap();
        assert_eq!(back, failed);
    }
}
