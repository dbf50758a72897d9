use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static WORKLOAD_ENDPOINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new("^/?calico/v1/host/([^/]+)/workload/([^/]+)/([^/]+)/endpoint/([^/]+)$")
        .expect("should_compile")
});
static HOST_ENDPOINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new("^/?calico/v1/host/([^/]+)/endpoint/([^/]+)$").expect("should_compile")
});
static POLICY: Lazy<Regex> = Lazy::new(|| {
    Regex::new("^/?calico/v1/policy/tier/([^/]+)/policy/([^/]+)$").expect("should_compile")
});
static PROFILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new("^/?calico/v1/policy/profile/([^/]+)/(rules|tags|labels)$").expect("should_compile")
});
static TIER_METADATA: Lazy<Regex> = Lazy::new(|| {
    Regex::new("^/?calico/v1/policy/tier/([^/]+)/metadata$").expect("should_compile")
});

/// A parsed datastore path.
///
/// `Key::parse` is the only constructor used on the update path; keys that
/// don't match any known layout yield `None` and are never dispatched.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    WorkloadEndpoint(WorkloadEndpointKey),
    HostEndpoint(HostEndpointKey),
    Policy(PolicyKey),
    Profile(ProfileKey),
    TierMetadata(TierKey),
}

/// The dispatch tag for a `Key`: listeners register against a kind, not a
/// particular key instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyKind {
    WorkloadEndpoint,
    HostEndpoint,
    Policy,
    Profile,
    TierMetadata,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkloadEndpointKey {
    pub hostname: String,
    pub orchestrator: String,
    pub workload: String,
    pub endpoint: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HostEndpointKey {
    pub hostname: String,
    pub endpoint: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PolicyKey {
    pub tier: String,
    pub name: String,
}

/// A profile is stored as three sibling leaves; the part tells listeners
/// which one this key names.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProfileKey {
    pub name: String,
    pub part: ProfilePart,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProfilePart {
    Rules,
    Tags,
    Labels,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TierKey {
    pub name: String,
}

// === impl Key ===

impl Key {
    /// Parses a raw store path. Unknown paths (including directories and
    /// anything outside the known layouts) return `None`.
    pub fn parse(raw: &str) -> Option<Key> {
        if let Some(c) = WORKLOAD_ENDPOINT.captures(raw) {
            return Some(Key::WorkloadEndpoint(WorkloadEndpointKey {
                hostname: c[1].to_string(),
                orchestrator: c[2].to_string(),
                workload: c[3].to_string(),
                endpoint: c[4].to_string(),
            }));
        }
        if let Some(c) = HOST_ENDPOINT.captures(raw) {
            return Some(Key::HostEndpoint(HostEndpointKey {
                hostname: c[1].to_string(),
                endpoint: c[2].to_string(),
            }));
        }
        if let Some(c) = POLICY.captures(raw) {
            return Some(Key::Policy(PolicyKey {
                tier: c[1].to_string(),
                name: c[2].to_string(),
            }));
        }
        if let Some(c) = PROFILE.captures(raw) {
            let part = match &c[2] {
                "rules" => ProfilePart::Rules,
                "tags" => ProfilePart::Tags,
                _ => ProfilePart::Labels,
            };
            return Some(Key::Profile(ProfileKey {
                name: c[1].to_string(),
                part,
            }));
        }
        if let Some(c) = TIER_METADATA.captures(raw) {
            return Some(Key::TierMetadata(TierKey {
                name: c[1].to_string(),
            }));
        }
        None
    }

    pub fn kind(&self) -> KeyKind {
        match self {
            Key::WorkloadEndpoint(_) => KeyKind::WorkloadEndpoint,
            Key::HostEndpoint(_) => KeyKind::HostEndpoint,
            Key::Policy(_) => KeyKind::Policy,
            Key::Profile(_) => KeyKind::Profile,
            Key::TierMetadata(_) => KeyKind::TierMetadata,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::WorkloadEndpoint(k) => write!(
                f,
                "/calico/v1/host/{}/workload/{}/{}/endpoint/{}",
                k.hostname, k.orchestrator, k.workload, k.endpoint
            ),
            Key::HostEndpoint(k) => {
                write!(f, "/calico/v1/host/{}/endpoint/{}", k.hostname, k.endpoint)
            }
            Key::Policy(k) => write!(f, "/calico/v1/policy/tier/{}/policy/{}", k.tier, k.name),
            Key::Profile(k) => {
                let part = match k.part {
                    ProfilePart::Rules => "rules",
                    ProfilePart::Tags => "tags",
                    ProfilePart::Labels => "labels",
                };
                write!(f, "/calico/v1/policy/profile/{}/{}", k.name, part)
            }
            Key::TierMetadata(k) => write!(f, "/calico/v1/policy/tier/{}/metadata", k.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_workload_endpoint() {
        let key = Key::parse("/calico/v1/host/h1/workload/orch/wl-a/endpoint/eth0").unwrap();
        assert_eq!(
            key,
            Key::WorkloadEndpoint(WorkloadEndpointKey {
                hostname: "h1".to_string(),
                orchestrator: "orch".to_string(),
                workload: "wl-a".to_string(),
                endpoint: "eth0".to_string(),
            })
        );
        assert_eq!(key.kind(), KeyKind::WorkloadEndpoint);
        assert_eq!(
            key.to_string(),
            "/calico/v1/host/h1/workload/orch/wl-a/endpoint/eth0"
        );
    }

    #[test]
    fn parses_host_endpoint() {
        let key = Key::parse("/calico/v1/host/h1/endpoint/eth1").unwrap();
        assert_eq!(
            key,
            Key::HostEndpoint(HostEndpointKey {
                hostname: "h1".to_string(),
                endpoint: "eth1".to_string(),
            })
        );
    }

    #[test]
    fn parses_policy() {
        let key = Key::parse("/calico/v1/policy/tier/default/policy/allow-web").unwrap();
        assert_eq!(
            key,
            Key::Policy(PolicyKey {
                tier: "default".to_string(),
                name: "allow-web".to_string(),
            })
        );
    }

    #[test]
    fn parses_profile_parts() {
        for (path, part) in [
            ("/calico/v1/policy/profile/prof-1/rules", ProfilePart::Rules),
            ("/calico/v1/policy/profile/prof-1/tags", ProfilePart::Tags),
            (
                "/calico/v1/policy/profile/prof-1/labels",
                ProfilePart::Labels,
            ),
        ] {
            let key = Key::parse(path).unwrap();
            assert_eq!(
                key,
                Key::Profile(ProfileKey {
                    name: "prof-1".to_string(),
                    part,
                }),
                "{}",
                path
            );
            assert_eq!(key.to_string(), path);
        }
    }

    #[test]
    fn parses_tier_metadata() {
        let key = Key::parse("/calico/v1/policy/tier/default/metadata").unwrap();
        assert_eq!(
            key,
            Key::TierMetadata(TierKey {
                name: "default".to_string(),
            })
        );
    }

    #[test]
    fn tolerates_missing_leading_slash() {
        assert!(Key::parse("calico/v1/host/h1/endpoint/eth1").is_some());
    }

    #[test]
    fn ignores_unknown_keys() {
        for path in [
            "/calico/v1",
            "/calico/v1/host/h1",
            "/calico/v1/host/h1/workload/orch/wl-a",
            "/calico/v1/host/h1/workload/orch/wl-a/endpoint/eth0/extra",
            "/calico/v1/policy/tier/default",
            "/calico/v1/policy/profile/prof-1/unknown",
            "/calico/v1/config/InterfacePrefix",
            "/other/v1/host/h1/endpoint/eth1",
        ] {
            assert!(Key::parse(path).is_none(), "{}", path);
        }
    }
}
