// src/core/keys.rs

//! The cache key codec.
//!
//! Every entry in the provider cache is addressed by a string produced by
//! [`ResourceKey::encode`]. The format is `gce:<namespace>:<field>:<field>...`,
//! with every field percent-encoded so that the `:` separator can never occur
//! inside a field. An absent zone is written as an empty segment.

use crate::core::errors::CacheError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// The provider tag that prefixes every key.
pub const PROVIDER: &str = "gce";
/// The pseudo-region used for global load balancers.
pub const GLOBAL_REGION: &str = "global";

const SEPARATOR: char = ':';

/// Partitions the keyspace by entity kind.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Namespace {
    Applications,
    Clusters,
    ServerGroups,
    Instances,
    LoadBalancers,
    Images,
    OnDemand,
}

/// The decoded form of a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Application {
        application: String,
    },
    Cluster {
        account: String,
        application: String,
        cluster: String,
    },
    ServerGroup {
        account: String,
        region: String,
        zone: Option<String>,
        cluster: String,
        server_group: String,
    },
    Instance {
        account: String,
        region: String,
        instance: String,
    },
    LoadBalancer {
        account: String,
        region: String,
        load_balancer: String,
    },
    Image {
        account: String,
        image: String,
    },
}

impl ResourceKey {
    pub fn application(application: impl Into<String>) -> Self {
        ResourceKey::Application {
            application: application.into(),
        }
    }

    pub fn cluster(
        account: impl Into<String>,
        application: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Self {
        ResourceKey::Cluster {
            account: account.into(),
            application: application.into(),
            cluster: cluster.into(),
        }
    }

    pub fn server_group(
        account: impl Into<String>,
        region: impl Into<String>,
        zone: Option<String>,
        cluster: impl Into<String>,
        server_group: impl Into<String>,
    ) -> Self {
        ResourceKey::ServerGroup {
            account: account.into(),
            region: region.into(),
            zone,
            cluster: cluster.into(),
            server_group: server_group.into(),
        }
    }

    pub fn instance(
        account: impl Into<String>,
        region: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        ResourceKey::Instance {
            account: account.into(),
            region: region.into(),
            instance: instance.into(),
        }
    }

    pub fn load_balancer(
        account: impl Into<String>,
        region: impl Into<String>,
        load_balancer: impl Into<String>,
    ) -> Self {
        ResourceKey::LoadBalancer {
            account: account.into(),
            region: region.into(),
            load_balancer: load_balancer.into(),
        }
    }

    pub fn image(account: impl Into<String>, image: impl Into<String>) -> Self {
        ResourceKey::Image {
            account: account.into(),
            image: image.into(),
        }
    }

    /// The namespace this kind of key lives in.
    pub fn namespace(&self) -> Namespace {
        match self {
            ResourceKey::Application { .. } => Namespace::Applications,
            ResourceKey::Cluster { .. } => Namespace::Clusters,
            ResourceKey::ServerGroup { .. } => Namespace::ServerGroups,
            ResourceKey::Instance { .. } => Namespace::Instances,
            ResourceKey::LoadBalancer { .. } => Namespace::LoadBalancers,
            ResourceKey::Image { .. } => Namespace::Images,
        }
    }

    /// The ordered `(field name, value)` pairs of this key. An absent zone is
    /// reported as an empty value.
    fn fields(&self) -> Vec<(&'static str, &str)> {
        match self {
            ResourceKey::Application { application } => vec![("application", application.as_str())],
            ResourceKey::Cluster {
                account,
                application,
                cluster,
            } => vec![
                ("account", account.as_str()),
                ("application", application.as_str()),
                ("cluster", cluster.as_str()),
            ],
            ResourceKey::ServerGroup {
                account,
                region,
                zone,
                cluster,
                server_group,
            } => vec![
                ("account", account.as_str()),
                ("region", region.as_str()),
                ("zone", zone.as_deref().unwrap_or("")),
                ("cluster", cluster.as_str()),
                ("serverGroup", server_group.as_str()),
            ],
            ResourceKey::Instance {
                account,
                region,
                instance,
            } => vec![
                ("account", account.as_str()),
                ("region", region.as_str()),
                ("instance", instance.as_str()),
            ],
            ResourceKey::LoadBalancer {
                account,
                region,
                load_balancer,
            } => vec![
                ("account", account.as_str()),
                ("region", region.as_str()),
                ("loadBalancer", load_balancer.as_str()),
            ],
            ResourceKey::Image { account, image } => {
                vec![("account", account.as_str()), ("image", image.as_str())]
            }
        }
    }

    /// Encodes the key into its canonical string form.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(64);
        out.push_str(PROVIDER);
        out.push(SEPARATOR);
        out.push_str(self.namespace().as_ref());
        for (_, value) in self.fields() {
            out.push(SEPARATOR);
            out.push_str(&urlencoding::encode(value));
        }
        out
    }

    /// Decodes a string produced by [`ResourceKey::encode`].
    ///
    /// Fails with `MalformedKey` for anything `encode` could not have produced,
    /// including non-canonical percent-encoding and empty required fields.
    pub fn decode(key: &str) -> Result<ResourceKey, CacheError> {
        let malformed = |reason: &str| CacheError::MalformedKey(format!("'{key}': {reason}"));

        let mut segments = key.split(SEPARATOR);
        if segments.next() != Some(PROVIDER) {
            return Err(malformed("unknown provider prefix"));
        }
        let namespace: Namespace = segments
            .next()
            .ok_or_else(|| malformed("missing namespace"))?
            .parse()
            .map_err(|_| malformed("unknown namespace"))?;

        let mut fields = Vec::with_capacity(5);
        for raw in segments {
            let decoded = urlencoding::decode(raw)
                .map_err(|_| malformed("invalid percent-encoding"))?
                .into_owned();
            if urlencoding::encode(&decoded) != raw {
                return Err(malformed("non-canonical field encoding"));
            }
            fields.push(decoded);
        }

        let expected = match namespace {
            Namespace::Applications => 1,
            Namespace::Clusters => 3,
            Namespace::ServerGroups => 5,
            Namespace::Instances | Namespace::LoadBalancers => 3,
            Namespace::Images => 2,
            Namespace::OnDemand => 0,
        };
        if fields.len() != expected {
            return Err(malformed(&format!(
                "expected {expected} fields for {namespace}, found {}",
                fields.len()
            )));
        }

        let mut fields = fields.into_iter();
        let mut required = |name: &str| -> Result<String, CacheError> {
            match fields.next() {
                Some(value) if !value.is_empty() => Ok(value),
                _ => Err(malformed(&format!("empty {name}"))),
            }
        };

        let decoded = match namespace {
            Namespace::Applications => ResourceKey::Application {
                application: required("application")?,
            },
            Namespace::Clusters => ResourceKey::Cluster {
                account: required("account")?,
                application: required("application")?,
                cluster: required("cluster")?,
            },
            Namespace::ServerGroups => {
                let account = required("account")?;
                let region = required("region")?;
                let zone = required("zone").ok();
                ResourceKey::ServerGroup {
                    account,
                    region,
                    zone,
                    cluster: required("cluster")?,
                    server_group: required("serverGroup")?,
                }
            }
            Namespace::Instances => ResourceKey::Instance {
                account: required("account")?,
                region: required("region")?,
                instance: required("instance")?,
            },
            Namespace::LoadBalancers => ResourceKey::LoadBalancer {
                account: required("account")?,
                region: required("region")?,
                load_balancer: required("loadBalancer")?,
            },
            Namespace::Images => ResourceKey::Image {
                account: required("account")?,
                image: required("image")?,
            },
            Namespace::OnDemand => return Err(malformed("onDemand is not a key kind")),
        };
        Ok(decoded)
    }

    /// The decoded field map exposed to observers, including `provider` and `type`.
    pub fn parse_details(&self) -> IndexMap<String, String> {
        let mut details = IndexMap::new();
        details.insert("provider".to_string(), PROVIDER.to_string());
        details.insert("type".to_string(), self.namespace().to_string());
        for (name, value) in self.fields() {
            if !value.is_empty() {
                details.insert(name.to_string(), value.to_string());
            }
        }
        details
    }
}

/// Builds a glob matching the encoded keys of the server group `name` in the
/// given region. `zone` of `None` restricts the match to regional groups;
/// `Some("*")` matches any zone, including none.
pub fn server_group_pattern(
    account: &str,
    region: &str,
    zone: Option<&str>,
    cluster: &str,
    name: &str,
) -> String {
    let zone = match zone {
        Some("*") => "*".to_string(),
        Some(z) => urlencoding::encode(z).into_owned(),
        None => String::new(),
    };
    format!(
        "{PROVIDER}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{zone}{SEPARATOR}{}{SEPARATOR}{}",
        Namespace::ServerGroups.as_ref(),
        urlencoding::encode(account),
        urlencoding::encode(region),
        urlencoding::encode(cluster),
        urlencoding::encode(name),
    )
}

/// Whether a caching agent covers a single zone or a whole region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScopeKind {
    Zonal,
    Regional,
}

/// The slice of the keyspace a caching agent owns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardScope {
    pub account: String,
    pub region: String,
    pub kind: ScopeKind,
}

impl ShardScope {
    pub fn new(account: impl Into<String>, region: impl Into<String>, kind: ScopeKind) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
            kind,
        }
    }

    /// Returns true if `key` is a server group key inside this shard.
    /// Zonal agents own the zoned groups of their region; regional agents own
    /// the zoneless ones.
    pub fn owns(&self, key: &ResourceKey) -> bool {
        match key {
            ResourceKey::ServerGroup {
                account,
                region,
                zone,
                ..
            } => {
                *account == self.account
                    && *region == self.region
                    && zone.is_some() == (self.kind == ScopeKind::Zonal)
            }
            _ => false,
        }
    }

    /// Decodes `key` and checks ownership. Keys that fail to decode are never owned.
    pub fn owns_encoded(&self, key: &str) -> bool {
        ResourceKey::decode(key).is_ok_and(|k| self.owns(&k))
    }
}
