use serde::Serialize;

/// First line of every intake request, describing who sends the events.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct Metadata {
    service: Service,
}

#[derive(Clone, Debug, Serialize)]
struct Service {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<String>,
    agent: Agent,
}

#[derive(Clone, Debug, Serialize)]
struct Agent {
    name: &'static str,
    version: &'static str,
}

const AGENT_NAME: &str = "rust";

impl Metadata {
    pub(crate) fn new(name: String, version: Option<String>, environment: Option<String>) -> Self {
        Metadata {
            service: Service {
                name,
                version,
                environment,
                agent: Agent {
                    name: AGENT_NAME,
                    version: env!("CARGO_PKG_VERSION"),
                },
            },
        }
    }
}

#[derive(Serialize)]
struct MetadataLine<'a> {
    metadata: &'a Metadata,
}

impl Metadata {
    /// The metadata as one NDJSON line, newline included.
    pub(crate) fn to_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(&MetadataLine { metadata: self })?;
        line.push(b'\n');
        Ok(line)
    }
}
