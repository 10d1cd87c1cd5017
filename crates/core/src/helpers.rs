use chrono::{Datelike, NaiveDate};

/// True iff `instance_type` starts with one of `prefixes` *and* the
/// character immediately following the matched prefix is an ASCII digit
/// `1`-`9`. This is what keeps `hpc...` from aliasing family `h`, and
/// `trn...` from aliasing family `t`.
pub fn type_matches(instance_type: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|prefix| {
        instance_type
            .strip_prefix(prefix)
            .and_then(|rest| rest.as_bytes().first())
            .is_some_and(|b| (b'1'..=b'9').contains(b))
    })
}

/// Produces `YYYY-MM-*` strings covering exactly 12 consecutive months
/// ending at `reference`'s month (inclusive). Used to walk a
/// `creation-date` filter back one month at a time when resolving an
/// image by instance type.
pub fn aws_last_year_filter_values(reference: NaiveDate) -> Vec<String> {
    let mut out = Vec::with_capacity(12);
    let mut year = reference.year();
    let mut month = reference.month() as i32;
    for _ in 0..12 {
        out.push(format!("{year:04}-{month:02}-*"));
        month -= 1;
        if month == 0 {
            month = 12;
            year -= 1;
        }
    }
    out
}
