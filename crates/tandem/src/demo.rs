//! Example operations served by `tandem agent`.
//!
//! - `demo:Echo` trades greetings over the private channel and echoes `data`
//! - `demo:SystemLoad` reports the remote side's load average
//! - `demo:Copy` streams a local file to a path on the remote side

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tandem_command::{Command, LocalContext, Registry, RemoteContext, Result};
use tandem_peer::Channel;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Module name of the demo plugin.
pub const PLUGIN: &str = "demo";

/// Bytes read from the source file per message.
pub const COPY_PIECE_SIZE: usize = 0x8000;

/// Activate every demo operation.
pub fn register(registry: &Registry) -> Result<()> {
    registry.register::<Echo>()?;
    registry.register::<SystemLoad>()?;
    registry.register::<CopyFile>()?;
    Ok(())
}

/// Make the demo operations available to `tandem:Export` without activating them.
pub fn deploy(registry: &Registry) -> Result<()> {
    registry.deploy::<Echo>()?;
    registry.deploy::<SystemLoad>()?;
    registry.deploy::<CopyFile>()?;
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
struct Greeting {
    pid: u32,
    text: String,
}

/// Echo `data` back along with the remote process id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Echo {
    pub data: String,
}

impl Default for Echo {
    fn default() -> Self {
        Self {
            data: "ping".into(),
        }
    }
}

#[async_trait]
impl Command for Echo {
    const PLUGIN: &'static str = PLUGIN;
    const NAME: &'static str = "Echo";
    type Output = Value;
    type Remote = Value;

    async fn local(&self, ctx: LocalContext<Value>) -> anyhow::Result<Value> {
        let pid = std::process::id();
        ctx.channel()
            .send(&Greeting {
                pid,
                text: format!("hello from {pid}"),
            })
            .await?;
        let reply: Greeting = ctx.channel().receive().await?;

        let mut merged = ctx.remote().await?;
        if let Value::Object(map) = &mut merged {
            map.insert("reply".into(), json!(reply.text));
        }
        Ok(merged)
    }

    async fn remote(&self, ctx: RemoteContext) -> anyhow::Result<Value> {
        let pid = std::process::id();
        let greeting: Greeting = ctx.channel().receive().await?;
        debug!(from = greeting.pid, text = %greeting.text, "greeting received");
        ctx.channel()
            .send(&Greeting {
                pid,
                text: format!("hello back from {pid}"),
            })
            .await?;
        Ok(json!({"echo": self.data, "pid": pid}))
    }
}

/// Remote load average, sampled at `time` (seconds since the epoch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub time: f64,
    pub loadavg: [f64; 3],
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemLoad {}

#[async_trait]
impl Command for SystemLoad {
    const PLUGIN: &'static str = PLUGIN;
    const NAME: &'static str = "SystemLoad";
    type Output = LoadReport;
    type Remote = LoadReport;

    async fn local(&self, ctx: LocalContext<LoadReport>) -> anyhow::Result<LoadReport> {
        Ok(ctx.remote().await?)
    }

    async fn remote(&self, _ctx: RemoteContext) -> anyhow::Result<LoadReport> {
        let text = tokio::fs::read_to_string("/proc/loadavg")
            .await
            .context("load average is not available on this system")?;
        let time = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs_f64();
        Ok(LoadReport {
            time,
            loadavg: parse_loadavg(&text)?,
        })
    }
}

fn parse_loadavg(text: &str) -> anyhow::Result<[f64; 3]> {
    let mut fields = text.split_whitespace();
    let mut loadavg = [0.0; 3];
    for slot in &mut loadavg {
        let field = fields.next().context("truncated load average")?;
        *slot = field
            .parse()
            .with_context(|| format!("bad load average field {field:?}"))?;
    }
    Ok(loadavg)
}

/// One message of a file transfer. File bytes travel as a base64 string.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Transfer {
    Data(#[serde(with = "base64_bytes")] Vec<u8>),
    Abort(String),
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// Copy `src` on the invoking side to `dest` on the remote side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyFile {
    pub src: String,
    pub dest: String,
}

impl CopyFile {
    async fn stream(&self, channel: &Channel) -> anyhow::Result<u64> {
        let mut file = tokio::fs::File::open(&self.src)
            .await
            .with_context(|| format!("opening {}", self.src))?;
        let mut buf = vec![0u8; COPY_PIECE_SIZE];
        let mut sent = 0u64;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            channel.send(&Transfer::Data(buf[..n].to_vec())).await?;
            sent += n as u64;
        }
        channel.end_iteration()?;
        Ok(sent)
    }
}

#[async_trait]
impl Command for CopyFile {
    const PLUGIN: &'static str = PLUGIN;
    const NAME: &'static str = "Copy";
    type Output = Value;
    type Remote = Value;

    async fn local(&self, ctx: LocalContext<Value>) -> anyhow::Result<Value> {
        let sent = match self.stream(ctx.channel()).await {
            Ok(sent) => sent,
            Err(err) => {
                let _ = ctx.channel().send(&Transfer::Abort(format!("{err:#}"))).await;
                return Err(err);
            }
        };
        debug!(src = %self.src, bytes = sent, "file streamed");

        let mut report = ctx.remote().await?;
        if let Value::Object(map) = &mut report {
            map.insert("src".into(), json!(self.src));
        }
        Ok(report)
    }

    async fn remote(&self, ctx: RemoteContext) -> anyhow::Result<Value> {
        if self.dest.is_empty() {
            bail!("no destination given");
        }
        let mut file = tokio::fs::File::create(&self.dest)
            .await
            .with_context(|| format!("creating {}", self.dest))?;

        let mut written = 0u64;
        while let Some(piece) = ctx.channel().next_item::<Transfer>().await? {
            match piece {
                Transfer::Data(bytes) => {
                    file.write_all(&bytes).await?;
                    written += bytes.len() as u64;
                }
                Transfer::Abort(reason) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&self.dest).await;
                    bail!("sender aborted the transfer: {reason}");
                }
            }
        }
        file.flush().await?;
        Ok(json!({"dest": self.dest, "bytes": written}))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use tandem_command::{CommandError, Session};
    use tandem_peer::PeerConfig;

    use super::*;

    fn pair(b: Registry) -> (Session, Session) {
        let a = Registry::new();
        register(&a).unwrap();
        let (left, right) = tokio::io::duplex(64 * 1024);
        let (left_read, left_write) = tokio::io::split(left);
        let (right_read, right_write) = tokio::io::split(right);
        (
            Session::start(left_read, left_write, Arc::new(a), PeerConfig::default()).unwrap(),
            Session::start(right_read, right_write, Arc::new(b), PeerConfig::default()).unwrap(),
        )
    }

    fn demo_registry() -> Registry {
        let registry = Registry::new();
        register(&registry).unwrap();
        registry
    }

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "tandem-demo-{tag}-{}-{}",
            std::process::id(),
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    #[test]
    fn test_parse_loadavg() {
        let parsed = parse_loadavg("0.52 0.58 0.59 1/1024 12345\n").unwrap();
        assert_eq!(parsed, [0.52, 0.58, 0.59]);
        assert!(parse_loadavg("0.52 0.58").is_err());
        assert!(parse_loadavg("a b c").is_err());
    }

    #[test]
    fn test_transfer_bytes_travel_as_base64() {
        let piece = Transfer::Data(vec![0, 1, 2, 0xFF]);
        let value = serde_json::to_value(&piece).unwrap();
        assert_eq!(value, json!({"data": "AAEC/w=="}));
        assert_eq!(serde_json::from_value::<Transfer>(value).unwrap(), piece);

        let wire = serde_json::to_vec(&Transfer::Data(vec![0xAB; COPY_PIECE_SIZE])).unwrap();
        assert!(wire.len() < COPY_PIECE_SIZE * 3 / 2);
        assert!(serde_json::from_value::<Transfer>(json!({"data": "@@"})).is_err());
    }

    #[tokio::test]
    async fn test_echo_scenario() {
        let (a, _b) = pair(demo_registry());

        let value = a
            .invoke_named("demo:Echo", json!({"data": "hello"}))
            .await
            .unwrap();
        assert_eq!(value["echo"], "hello");
        assert_eq!(value["pid"], std::process::id());
        assert!(value["reply"].as_str().unwrap().starts_with("hello back from"));
    }

    #[tokio::test]
    async fn test_copy_streams_file() {
        let (a, _b) = pair(demo_registry());
        let src = temp_path("src");
        let dest = temp_path("dest");
        let contents: Vec<u8> = (0..3 * COPY_PIECE_SIZE + 17).map(|i| (i % 251) as u8).collect();
        std::fs::write(&src, &contents).unwrap();

        let report = a
            .invoke(CopyFile {
                src: src.display().to_string(),
                dest: dest.display().to_string(),
            })
            .await
            .unwrap();
        assert_eq!(report["bytes"], contents.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), contents);

        let _ = std::fs::remove_file(&src);
        let _ = std::fs::remove_file(&dest);
    }

    #[tokio::test]
    async fn test_copy_missing_source_fails_locally() {
        let (a, _b) = pair(demo_registry());
        let dest = temp_path("unused");

        let err = a
            .invoke(CopyFile {
                src: temp_path("missing").display().to_string(),
                dest: dest.display().to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::LocalFailure { .. }));
        let _ = std::fs::remove_file(&dest);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_system_load() {
        let (a, _b) = pair(demo_registry());
        let report = a.invoke(SystemLoad {}).await.unwrap();
        assert!(report.time > 0.0);
        assert!(report.loadavg.iter().all(|load| *load >= 0.0));
    }

    #[tokio::test]
    async fn test_negotiation_activates_demo() {
        let b = Registry::new();
        deploy(&b).unwrap();
        let (a, _b) = pair(b);

        let capabilities = a.negotiate(PLUGIN).await.unwrap();
        assert!(capabilities.missing.is_empty());
        let value = a.invoke(Echo::default()).await.unwrap();
        assert_eq!(value["echo"], "ping");
    }
}
