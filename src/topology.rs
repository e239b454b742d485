//! How a resource distributes across availability zones.

use serde::{Deserialize, Serialize};

/// AZ sentinel meaning "topology-agnostic bucket" (used by flat and az-aware resources).
pub const AZ_ANY: &str = "any";
/// AZ sentinel meaning "reported but not assigned to a configured AZ".
pub const AZ_UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    /// Single bucket `any`.
    Flat,
    /// Per AZ plus `any` for base quota.
    AzAware,
    /// Per AZ only; quota is per-AZ, there is no aggregate.
    AzSeparated,
}

impl Topology {
    /// True if `az` is one of the two non-real sentinel AZs.
    pub fn is_sentinel_az(az: &str) -> bool {
        az == AZ_ANY || az == AZ_UNKNOWN
    }

    /// Validates that `per_az` keys (as reported by a backend's usage report)
    /// are consistent with this topology, given the set of configured AZs.
    pub fn validate_reported_azs(
        &self,
        configured_azs: &[String],
        reported_azs: &[String],
    ) -> Result<(), String> {
        match self {
            Topology::Flat => {
                if reported_azs.iter().any(|az| az != AZ_ANY) {
                    return Err(format!(
                        "flat topology must only report AZ '{AZ_ANY}', got {reported_azs:?}"
                    ));
                }
            }
            Topology::AzAware => {
                for az in reported_azs {
                    if az != AZ_ANY && az != AZ_UNKNOWN && !configured_azs.iter().any(|c| c == az) {
                        return Err(format!(
                            "az-aware topology reported unconfigured AZ '{az}'"
                        ));
                    }
                }
            }
            Topology::AzSeparated => {
                for configured in configured_azs {
                    if !reported_azs.iter().any(|az| az == configured) {
                        return Err(format!(
                            "az-separated topology missing configured AZ '{configured}'"
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// True if the given AZ is allowed to carry quota under this topology.
    pub fn az_may_carry_quota(&self, az: &str) -> bool {
        match self {
            Topology::Flat => az == AZ_ANY,
            Topology::AzAware => true,
            Topology::AzSeparated => !Self::is_sentinel_az(az),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_rejects_non_any() {
        let t = Topology::Flat;
        assert!(t.validate_reported_azs(&[], &["any".into()]).is_ok());
        assert!(t.validate_reported_azs(&[], &["az-one".into()]).is_err());
    }

    #[test]
    fn az_separated_requires_every_configured_az() {
        let t = Topology::AzSeparated;
        let configured = vec!["az-one".to_string(), "az-two".to_string()];
        assert!(
            t.validate_reported_azs(&configured, &["az-one".into(), "az-two".into()])
                .is_ok()
        );
        assert!(
            t.validate_reported_azs(&configured, &["az-one".into()])
                .is_err()
        );
    }

    #[test]
    fn sentinel_azs_never_carry_quota_when_az_separated() {
        let t = Topology::AzSeparated;
        assert!(!t.az_may_carry_quota(AZ_ANY));
        assert!(!t.az_may_carry_quota(AZ_UNKNOWN));
        assert!(t.az_may_carry_quota("az-one"));
    }
}
