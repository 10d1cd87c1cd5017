use crate::helpers::type_matches;

/// One of the ten "Running On-Demand ..." EC2 service quotas, each covering
/// exactly one instance-family bucket. All values are denominated in vCPUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaBucket {
    Dl,
    F,
    GAndVt,
    HighMemory,
    Hpc,
    Inf,
    P,
    Standard,
    Trn,
    X,
}

impl QuotaBucket {
    pub const ALL: [QuotaBucket; 10] = [
        QuotaBucket::Dl,
        QuotaBucket::F,
        QuotaBucket::GAndVt,
        QuotaBucket::HighMemory,
        QuotaBucket::Hpc,
        QuotaBucket::Inf,
        QuotaBucket::P,
        QuotaBucket::Standard,
        QuotaBucket::Trn,
        QuotaBucket::X,
    ];

    /// Exact EC2 service-quota name as reported by `ListServiceQuotas`.
    pub fn quota_name(&self) -> &'static str {
        match self {
            QuotaBucket::Dl => "Running On-Demand DL instances",
            QuotaBucket::F => "Running On-Demand F instances",
            QuotaBucket::GAndVt => "Running On-Demand G and VT instances",
            QuotaBucket::HighMemory => "Running On-Demand High Memory instances",
            QuotaBucket::Hpc => "Running On-Demand HPC instances",
            QuotaBucket::Inf => "Running On-Demand Inf instances",
            QuotaBucket::P => "Running On-Demand P instances",
            QuotaBucket::Standard => "Running On-Demand Standard (A, C, D, H, I, M, R, T, Z) instances",
            QuotaBucket::Trn => "Running On-Demand Trn instances",
            QuotaBucket::X => "Running On-Demand X instances",
        }
    }

    fn family_prefixes(&self) -> &'static [&'static str] {
        match self {
            QuotaBucket::Dl => &["dl"],
            QuotaBucket::F => &["f"],
            QuotaBucket::GAndVt => &["g", "vt"],
            QuotaBucket::HighMemory => &["u"],
            QuotaBucket::Hpc => &["hpc"],
            QuotaBucket::Inf => &["inf"],
            QuotaBucket::P => &["p"],
            QuotaBucket::Standard => &["a", "c", "d", "h", "i", "m", "r", "t", "z"],
            QuotaBucket::Trn => &["trn"],
            QuotaBucket::X => &["x"],
        }
    }

    /// Maps an instance type (e.g. `"c6a.4xlarge"`) to exactly one bucket,
    /// or `None` if no family prefix matches (§8 scenario 6).
    pub fn for_instance_type(instance_type: &str) -> Option<QuotaBucket> {
        Self::ALL
            .into_iter()
            .find(|bucket| type_matches(instance_type, bucket.family_prefixes()))
    }

    /// True iff `instance_type` belongs to this bucket's family group. Used
    /// to sum vCPU usage across an entire bucket (e.g. all of Standard's
    /// a/c/d/h/i/m/r/t/z families), not just one requested type (§4.5 step 3).
    pub fn matches(&self, instance_type: &str) -> bool {
        type_matches(instance_type, self.family_prefixes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_standard_family() {
        assert_eq!(
            QuotaBucket::for_instance_type("c6a.4xlarge"),
            Some(QuotaBucket::Standard)
        );
        assert_eq!(
            QuotaBucket::for_instance_type("h1.large"),
            Some(QuotaBucket::Standard)
        );
    }

    #[test]
    fn maps_hpc_not_standard_h() {
        assert_eq!(
            QuotaBucket::for_instance_type("hpc7a.96xlarge"),
            Some(QuotaBucket::Hpc)
        );
    }

    #[test]
    fn unknown_family_has_no_bucket() {
        assert_eq!(QuotaBucket::for_instance_type("zz.garbage"), None);
    }

    #[test]
    fn z9_garbage_matches_standard() {
        assert_eq!(
            QuotaBucket::for_instance_type("z9.garbage"),
            Some(QuotaBucket::Standard)
        );
    }
}
