//! Host and item lookups

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::json;

use crate::errors::DeployError;
use crate::zabbix::client::ZabbixClient;

/// A monitored host
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Host {
    pub hostid: String,

    /// Technical host name, the device name
    pub host: String,

    #[serde(default)]
    pub name: String,
}

/// An item with its latest collection time
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Item {
    pub itemid: String,

    #[serde(default)]
    pub key_: String,

    /// Zero when the item never received data
    #[serde(default, deserialize_with = "number_string")]
    pub lastclock: i64,
}

fn number_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) if s.is_empty() => Ok(0),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

impl ZabbixClient {
    /// Look a host up by its technical name
    pub async fn find_host(&self, host_name: &str) -> Result<Option<Host>, DeployError> {
        let hosts: Vec<Host> = self
            .call(
                "host.get",
                json!({
                    "output": ["hostid", "host", "name"],
                    "filter": { "host": [host_name] },
                }),
            )
            .await?;
        Ok(hosts.into_iter().next())
    }

    /// Most recent collection time over the host's items
    pub async fn last_data(&self, hostid: &str) -> Result<Option<DateTime<Utc>>, DeployError> {
        let items: Vec<Item> = self
            .call(
                "item.get",
                json!({
                    "output": ["itemid", "key_", "lastclock"],
                    "hostids": [hostid],
                    "monitored": true,
                }),
            )
            .await?;
        Ok(items
            .iter()
            .map(|item| item.lastclock)
            .filter(|clock| *clock > 0)
            .max()
            .and_then(|clock| DateTime::from_timestamp(clock, 0)))
    }
}
