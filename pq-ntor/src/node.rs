//! Shared node/directory types (spec §4.6): the JSON shape the client
//! consumes from `GET /nodes` and the directory server produces/stores.

use crate::error::{NetError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Guard,
    Middle,
    Exit,
}

impl NodeRole {
    /// `POST /register`'s numeric role encoding (spec §4.6: 1|2|3).
    pub fn as_u8(self) -> u8 {
        match self {
            NodeRole::Guard => 1,
            NodeRole::Middle => 2,
            NodeRole::Exit => 3,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => NodeRole::Guard,
            2 => NodeRole::Middle,
            3 => NodeRole::Exit,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub hostname: String,
    pub port: u16,
    pub role: NodeRole,
    pub identity: [u8; 20],
}

impl NodeInfo {
    pub fn identity_hex(&self) -> String {
        hex::encode(self.identity)
    }
}

/// Wire shape of one entry in the `/nodes` JSON document.
#[derive(Debug, Serialize, Deserialize)]
struct WireNode {
    hostname: String,
    port: u16,
    #[serde(rename = "type")]
    role: NodeRole,
    identity: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireNodeList {
    version: String,
    nodes: Vec<WireNode>,
}

#[derive(Debug, Clone, Default)]
pub struct NodeList {
    pub guards: Vec<NodeInfo>,
    pub middles: Vec<NodeInfo>,
    pub exits: Vec<NodeInfo>,
}

impl NodeList {
    pub fn from_json(body: &str) -> Result<Self> {
        let wire: WireNodeList = serde_json::from_str(body)
            .map_err(|e| NetError::Directory(format!("malformed node list: {e}")))?;
        let mut list = NodeList::default();
        for n in wire.nodes {
            let identity = parse_identity(&n.identity)?;
            let info = NodeInfo {
                hostname: n.hostname,
                port: n.port,
                role: n.role,
                identity,
            };
            match info.role {
                NodeRole::Guard => list.guards.push(info),
                NodeRole::Middle => list.middles.push(info),
                NodeRole::Exit => list.exits.push(info),
            }
        }
        Ok(list)
    }

    pub fn to_json(&self) -> String {
        let nodes = self
            .guards
            .iter()
            .chain(self.middles.iter())
            .chain(self.exits.iter())
            .map(|n| WireNode {
                hostname: n.hostname.clone(),
                port: n.port,
                role: n.role,
                identity: n.identity_hex(),
            })
            .collect();
        let wire = WireNodeList {
            version: "1.0".into(),
            nodes,
        };
        serde_json::to_string(&wire).expect("NodeList serializes infallibly")
    }
}

fn parse_identity(s: &str) -> Result<[u8; 20]> {
    let bytes = hex::decode(s).map_err(|e| NetError::Directory(format!("bad identity hex: {e}")))?;
    if bytes.len() != 20 {
        return Err(NetError::Directory(format!(
            "identity must be 20 bytes, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_list_round_trips_through_json() {
        let mut list = NodeList::default();
        list.guards.push(NodeInfo {
            hostname: "127.0.0.1".into(),
            port: 9001,
            role: NodeRole::Guard,
            identity: [1u8; 20],
        });
        let json = list.to_json();
        let parsed = NodeList::from_json(&json).unwrap();
        assert_eq!(parsed.guards.len(), 1);
        assert_eq!(parsed.guards[0].identity, [1u8; 20]);
    }

    #[test]
    fn rejects_short_identity() {
        let body = r#"{"version":"1.0","nodes":[{"hostname":"x","port":1,"type":"guard","identity":"ab"}]}"#;
        assert!(NodeList::from_json(body).is_err());
    }
}
