//! Provider enrichment attached to honeypot sessions.
//!
//! Enrichment arrives as a loosely shaped JSON object keyed by provider name.
//! Known providers are parsed into typed records; anything that does not match
//! its expected shape is kept as [`ProviderRecord::Unknown`]. Accessors never
//! fail and return `None`/empty when the data is missing or malformed.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::trace;

use crate::stats::Coordinate;

/// Keys that may carry the enrichment timestamp at the top level.
const TIMESTAMP_KEYS: &[&str] = &["enriched_at", "enrichment_timestamp", "enrichment_ts"];

/// DShield IP reputation record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DshieldRecord {
    #[serde(default)]
    pub ip: DshieldIp,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DshieldIp {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub number: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub asname: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub ascountry: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_asn")]
    pub asn: Option<u32>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub count: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub attacks: Option<u64>,
}

/// SPUR infrastructure / anonymization record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpurRecord {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub ip: Option<String>,
    #[serde(default, rename = "as")]
    pub autonomous_system: Option<SpurAs>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub organization: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub infrastructure: Option<String>,
    #[serde(default, deserialize_with = "lenient::tunnels")]
    pub tunnels: Vec<SpurTunnel>,
    #[serde(default)]
    pub location: Option<SpurLocation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpurAs {
    #[serde(default, deserialize_with = "lenient::opt_asn")]
    pub number: Option<u32>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub organization: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpurTunnel {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub operator: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "lenient::opt_string")]
    pub kind: Option<String>,
    #[serde(default)]
    pub anonymous: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpurLocation {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub country: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub city: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub longitude: Option<f64>,
}

/// Geolocation record (MaxMind-style).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoRecord {
    #[serde(default, alias = "country_code", deserialize_with = "lenient::opt_string")]
    pub country: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub city: Option<String>,
    #[serde(default, alias = "lat", deserialize_with = "lenient::opt_f64")]
    pub latitude: Option<f64>,
    #[serde(default, alias = "lon", alias = "lng", deserialize_with = "lenient::opt_f64")]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_asn")]
    pub asn: Option<u32>,
    #[serde(default, alias = "as_org", deserialize_with = "lenient::opt_string")]
    pub asn_org: Option<String>,
}

/// One provider's enrichment payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProviderRecord {
    Dshield(DshieldRecord),
    Spur(SpurRecord),
    Geo(GeoRecord),
    /// Unrecognized provider or a known provider whose shape did not parse.
    Unknown(Value),
}

impl ProviderRecord {
    fn parse(provider: &str, value: &Value) -> Self {
        let parsed = match provider {
            "dshield" => serde_json::from_value(value.clone()).map(Self::Dshield),
            "spur" => serde_json::from_value(value.clone()).map(Self::Spur),
            "geo" | "geolocation" | "maxmind" => {
                serde_json::from_value(value.clone()).map(Self::Geo)
            }
            _ => return Self::Unknown(value.clone()),
        };

        parsed.unwrap_or_else(|e| {
            trace!("Enrichment for provider '{}' did not parse: {}", provider, e);
            Self::Unknown(value.clone())
        })
    }
}

/// All enrichment attached to one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    providers: BTreeMap<String, ProviderRecord>,
    enriched_at: Option<DateTime<Utc>>,
}

impl Enrichment {
    /// Builds enrichment from an arbitrary JSON value. Never fails: anything
    /// that is not an object yields empty enrichment.
    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::default();
        };

        let mut enrichment = Self::default();
        for (key, value) in map {
            if TIMESTAMP_KEYS.contains(&key.as_str()) {
                if enrichment.enriched_at.is_none() {
                    enrichment.enriched_at = lenient::timestamp(value);
                }
                continue;
            }
            if value.is_null() {
                continue;
            }
            enrichment
                .providers
                .insert(key.clone(), ProviderRecord::parse(key, value));
        }
        enrichment
    }

    /// True when no provider data is present at all.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn providers(&self) -> impl Iterator<Item = (&str, &ProviderRecord)> {
        self.providers.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn enriched_at(&self) -> Option<DateTime<Utc>> {
        self.enriched_at
    }

    pub fn dshield(&self) -> Option<&DshieldRecord> {
        self.providers.values().find_map(|r| match r {
            ProviderRecord::Dshield(d) => Some(d),
            _ => None,
        })
    }

    pub fn spur(&self) -> Option<&SpurRecord> {
        self.providers.values().find_map(|r| match r {
            ProviderRecord::Spur(s) => Some(s),
            _ => None,
        })
    }

    pub fn geo(&self) -> Option<&GeoRecord> {
        self.providers.values().find_map(|r| match r {
            ProviderRecord::Geo(g) => Some(g),
            _ => None,
        })
    }

    /// Declared country code, preferring geolocation over SPUR over DShield.
    pub fn country(&self) -> Option<&str> {
        self.geo()
            .and_then(|g| g.country.as_deref())
            .or_else(|| {
                self.spur()
                    .and_then(|s| s.location.as_ref())
                    .and_then(|l| l.country.as_deref())
            })
            .or_else(|| self.dshield().and_then(|d| d.ip.ascountry.as_deref()))
            .filter(|c| !c.is_empty())
    }

    /// Autonomous system number from any provider.
    pub fn asn(&self) -> Option<u32> {
        self.geo()
            .and_then(|g| g.asn)
            .or_else(|| {
                self.spur()
                    .and_then(|s| s.autonomous_system.as_ref())
                    .and_then(|a| a.number)
            })
            .or_else(|| self.dshield().and_then(|d| d.ip.asn))
    }

    /// Every ASN / organization description the providers report.
    pub fn asn_descriptions(&self) -> Vec<&str> {
        let mut out = Vec::new();
        if let Some(d) = self.dshield() {
            out.extend(d.ip.asname.as_deref());
        }
        if let Some(s) = self.spur() {
            out.extend(
                s.autonomous_system
                    .as_ref()
                    .and_then(|a| a.organization.as_deref()),
            );
            out.extend(s.organization.as_deref());
        }
        if let Some(g) = self.geo() {
            out.extend(g.asn_org.as_deref());
        }
        out.retain(|s| !s.is_empty());
        out
    }

    /// SPUR infrastructure tag (e.g. "DATACENTER", "VPN", "TOR").
    pub fn infrastructure(&self) -> Option<&str> {
        self.spur()
            .and_then(|s| s.infrastructure.as_deref())
            .filter(|s| !s.is_empty())
    }

    pub fn tunnels(&self) -> &[SpurTunnel] {
        self.spur().map(|s| s.tunnels.as_slice()).unwrap_or(&[])
    }

    /// First named tunnel operator, if any.
    pub fn tunnel_operator(&self) -> Option<&str> {
        self.tunnels()
            .iter()
            .find_map(|t| t.operator.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// Valid coordinates, preferring geolocation over SPUR.
    pub fn coordinates(&self) -> Option<Coordinate> {
        let from_geo = self
            .geo()
            .and_then(|g| Some((g.latitude?, g.longitude?)));
        let from_spur = || {
            self.spur()
                .and_then(|s| s.location.as_ref())
                .and_then(|l| Some((l.latitude?, l.longitude?)))
        };
        from_geo
            .or_else(from_spur)
            .and_then(|(lat, lon)| Coordinate::new(lat, lon).ok())
    }

    /// External attack-count reputation signal (DShield attacks, then count).
    pub fn attack_count(&self) -> Option<u64> {
        self.dshield().and_then(|d| d.ip.attacks.or(d.ip.count))
    }

    /// Source address as recorded by a provider.
    pub fn source_ip(&self) -> Option<&str> {
        self.dshield()
            .and_then(|d| d.ip.number.as_deref())
            .or_else(|| self.spur().and_then(|s| s.ip.as_deref()))
            .filter(|s| !s.is_empty())
    }
}

impl<'de> Deserialize<'de> for Enrichment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.map(|v| Self::from_value(&v)).unwrap_or_default())
    }
}

impl Serialize for Enrichment {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;

        let len = self.providers.len() + usize::from(self.enriched_at.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        for (name, record) in &self.providers {
            map.serialize_entry(name, record)?;
        }
        if let Some(at) = &self.enriched_at {
            map.serialize_entry("enriched_at", &at.to_rfc3339())?;
        }
        map.end()
    }
}

/// Tolerant field deserializers: malformed values become `None` instead of
/// failing the whole record.
mod lenient {
    use super::*;

    pub fn opt_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        })
    }

    pub fn opt_u64<'de, D>(d: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Value>::deserialize(d)?.and_then(|v| as_u64(&v)))
    }

    pub fn opt_f64<'de, D>(d: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .filter(|f: &f64| f.is_finite()))
    }

    /// Accepts `15169`, `"15169"` and `"AS15169"`.
    pub fn opt_asn<'de, D>(d: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                let digits = trimmed
                    .strip_prefix("AS")
                    .or_else(|| trimmed.strip_prefix("as"))
                    .unwrap_or(trimmed);
                digits.parse().ok()
            }
            Some(v) => as_u64(&v).and_then(|n| u32::try_from(n).ok()),
            None => None,
        })
    }

    /// Tunnels may be a list of objects; anything else is treated as empty.
    pub fn tunnels<'de, D>(d: D) -> Result<Vec<SpurTunnel>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            _ => Vec::new(),
        })
    }

    pub fn as_u64(value: &Value) -> Option<u64> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// RFC 3339 string or Unix epoch seconds.
    pub fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
        match value {
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Value::Number(n) => n
                .as_i64()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
            _ => None,
        }
    }
}
