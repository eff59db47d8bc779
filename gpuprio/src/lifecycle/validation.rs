//! Input validation for priority requests.
//!
//! Creation collects every violated rule instead of stopping at the first, so a
//! requester can fix all problems in one round trip.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::probe::Availability;

pub const MIN_DURATION_DAYS: i32 = 1;
pub const MAX_DURATION_DAYS: i32 = 14;
pub const MAX_TICKET_LEN: usize = 50;
pub const MAX_ADDITIONAL_USERNAMES: usize = 10;
pub const NAME_MIN_LEN: usize = 2;
pub const NAME_MAX_LEN: usize = 50;
pub const MAX_PROJECT_LEN: usize = 100;

/// A single failed rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Violation {
    pub field: String,
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Fields of a submission that go through validation.
#[derive(Debug, Clone)]
pub struct CreateFields<'a> {
    pub bugzilla_ticket: &'a str,
    pub gpu_type: &'a str,
    pub gpu_count: i32,
    pub duration_days: i32,
    pub slurm_project: &'a str,
    pub reason: &'a str,
    pub additional_usernames: &'a [String],
}

/// Environment the submission is checked against.
#[derive(Debug, Clone)]
pub struct CreateRules<'a> {
    pub known_gpu_types: &'a [String],
    pub availability: Availability,
    pub max_gpu_count: Option<u32>,
    pub max_duration_days: i32,
}

pub fn validate_create(fields: &CreateFields<'_>, rules: &CreateRules<'_>) -> Result<(), Vec<Violation>> {
    let mut violations = Vec::new();

    if let Err(message) = check_bugzilla_ticket(fields.bugzilla_ticket) {
        violations.push(Violation::new("bugzilla_ticket", message));
    }

    let max_duration = rules.max_duration_days.clamp(MIN_DURATION_DAYS, MAX_DURATION_DAYS);
    if !(MIN_DURATION_DAYS..=max_duration).contains(&fields.duration_days) {
        violations.push(Violation::new(
            "duration_days",
            format!("Duration must be between {MIN_DURATION_DAYS} and {max_duration} days"),
        ));
    }

    if fields.gpu_count < 1 {
        violations.push(Violation::new("gpu_count", "GPU count must be at least 1"));
    } else {
        let requested = i64::from(fields.gpu_count);
        match rules.max_gpu_count {
            Some(max) if requested > i64::from(max) => {
                violations.push(Violation::new("gpu_count", format!("GPU count must not exceed {max}")));
            }
            _ => {}
        }
        // Unknown availability skips the upper bound
        match rules.availability {
            Availability::Known(available) if requested > i64::from(available) => {
                violations.push(Violation::new(
                    "gpu_count",
                    format!("Only {available} {} GPUs are currently available", fields.gpu_type),
                ));
            }
            _ => {}
        }
    }

    if !rules.known_gpu_types.iter().any(|t| t == fields.gpu_type) {
        violations.push(Violation::new(
            "gpu_type",
            format!("Unknown GPU type '{}'. Known types: {}", fields.gpu_type, rules.known_gpu_types.join(", ")),
        ));
    }

    if let Err(message) = check_slurm_project(fields.slurm_project) {
        violations.push(Violation::new("slurm_project", message));
    }

    if fields.reason.trim().is_empty() {
        violations.push(Violation::new("reason", "Reason is required"));
    }

    if fields.additional_usernames.len() > MAX_ADDITIONAL_USERNAMES {
        violations.push(Violation::new(
            "additional_usernames",
            format!("At most {MAX_ADDITIONAL_USERNAMES} additional usernames are allowed"),
        ));
    }
    for username in fields.additional_usernames {
        if let Err(message) = check_username(username) {
            violations.push(Violation::new("additional_usernames", message));
        }
    }

    if violations.is_empty() { Ok(()) } else { Err(violations) }
}

pub fn check_bugzilla_ticket(ticket: &str) -> Result<(), String> {
    if ticket.is_empty() {
        return Err("Bugzilla ticket is required".to_string());
    }
    if ticket.len() > MAX_TICKET_LEN {
        return Err(format!("Bugzilla ticket must be at most {MAX_TICKET_LEN} digits"));
    }
    if !ticket.chars().all(|c| c.is_ascii_digit()) {
        return Err("Bugzilla ticket must contain digits only".to_string());
    }
    Ok(())
}

/// QOS names: `[A-Za-z0-9_-]{2,50}`, not starting or ending with `-`.
pub fn check_priority_name(name: &str) -> Result<(), String> {
    let len = name.chars().count();
    if !(NAME_MIN_LEN..=NAME_MAX_LEN).contains(&len) {
        return Err(format!(
            "Priority name must be between {NAME_MIN_LEN} and {NAME_MAX_LEN} characters"
        ));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err("Priority name may only contain letters, digits, underscores and hyphens".to_string());
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err("Priority name must not start or end with a hyphen".to_string());
    }
    Ok(())
}

/// Cluster usernames: a letter followed by letters, digits, `.` or `-`; 2 to 50 characters.
pub fn check_username(username: &str) -> Result<(), String> {
    let len = username.chars().count();
    if !(NAME_MIN_LEN..=NAME_MAX_LEN).contains(&len) {
        return Err(format!(
            "Username '{username}' must be between {NAME_MIN_LEN} and {NAME_MAX_LEN} characters"
        ));
    }
    let mut chars = username.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    if !starts_with_letter || !chars.all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-') {
        return Err(format!(
            "Username '{username}' must start with a letter and contain only letters, digits, dots and hyphens"
        ));
    }
    Ok(())
}

pub fn check_slurm_project(project: &str) -> Result<(), String> {
    if project.is_empty() || project.len() > MAX_PROJECT_LEN {
        return Err(format!("SLURM project must be between 1 and {MAX_PROJECT_LEN} characters"));
    }
    if !project.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-') {
        return Err("SLURM project may only contain letters, digits, underscores, dots and hyphens".to_string());
    }
    Ok(())
}

/// Split a free-form username list on newlines, commas and whitespace, dropping
/// blanks and repeats while keeping the first-seen order.
pub fn normalize_usernames<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for entry in raw {
        for part in entry.as_ref().split(|c: char| c == ',' || c.is_whitespace()) {
            let part = part.trim();
            if !part.is_empty() && !out.iter().any(|u| u == part) {
                out.push(part.to_string());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fallback_types() -> Vec<String> {
        vec!["rtx3090".to_string(), "v100".to_string(), "h100".to_string()]
    }

    fn fields<'a>(duration_days: i32, gpu_count: i32, usernames: &'a [String]) -> CreateFields<'a> {
        CreateFields {
            bugzilla_ticket: "12345",
            gpu_type: "v100",
            gpu_count,
            duration_days,
            slurm_project: "proj_a",
            reason: "paper deadline",
            additional_usernames: usernames,
        }
    }

    fn rules(types: &[String], availability: Availability) -> CreateRules<'_> {
        CreateRules {
            known_gpu_types: types,
            availability,
            max_gpu_count: None,
            max_duration_days: MAX_DURATION_DAYS,
        }
    }

    #[test]
    fn test_duration_bounds() {
        let types = fallback_types();
        for days in 1..=14 {
            assert!(validate_create(&fields(days, 1, &[]), &rules(&types, Availability::Unknown)).is_ok());
        }
        for days in [0, 15, -3] {
            let violations = validate_create(&fields(days, 1, &[]), &rules(&types, Availability::Unknown)).unwrap_err();
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].field, "duration_days");
        }
    }

    #[test]
    fn test_reports_every_violation() {
        let types = fallback_types();
        let usernames = vec!["1bad".to_string()];
        let input = CreateFields {
            bugzilla_ticket: "BZ-12",
            gpu_type: "a100",
            gpu_count: 0,
            duration_days: 15,
            slurm_project: "has space",
            reason: "  ",
            additional_usernames: &usernames,
        };

        let violations = validate_create(&input, &rules(&types, Availability::Unknown)).unwrap_err();
        let fields: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "bugzilla_ticket",
                "duration_days",
                "gpu_count",
                "gpu_type",
                "slurm_project",
                "reason",
                "additional_usernames"
            ]
        );
    }

    #[test]
    fn test_known_availability_caps_count() {
        let types = fallback_types();
        let violations = validate_create(&fields(7, 5, &[]), &rules(&types, Availability::Known(4))).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("Only 4 v100"));

        assert!(validate_create(&fields(7, 4, &[]), &rules(&types, Availability::Known(4))).is_ok());
    }

    #[test]
    fn test_unknown_availability_skips_upper_bound() {
        let types = fallback_types();
        assert!(validate_create(&fields(7, 500, &[]), &rules(&types, Availability::Unknown)).is_ok());
    }

    #[test]
    fn test_configured_max_gpu_count() {
        let types = fallback_types();
        let mut r = rules(&types, Availability::Unknown);
        r.max_gpu_count = Some(8);
        assert!(validate_create(&fields(7, 9, &[]), &r).is_err());
        assert!(validate_create(&fields(7, 8, &[]), &r).is_ok());
    }

    #[test]
    fn test_configured_max_duration_is_clamped() {
        let types = fallback_types();
        let mut r = rules(&types, Availability::Unknown);
        r.max_duration_days = 5;
        assert!(validate_create(&fields(6, 1, &[]), &r).is_err());
        r.max_duration_days = 30;
        assert!(validate_create(&fields(15, 1, &[]), &r).is_err());
    }

    #[test]
    fn test_too_many_usernames() {
        let types = fallback_types();
        let usernames: Vec<String> = (0..11).map(|i| format!("user{i}")).collect();
        let violations = validate_create(&fields(7, 1, &usernames), &rules(&types, Availability::Unknown)).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "additional_usernames");
    }

    #[test]
    fn test_bugzilla_ticket() {
        assert!(check_bugzilla_ticket("12345").is_ok());
        assert!(check_bugzilla_ticket("").is_err());
        assert!(check_bugzilla_ticket("12a45").is_err());
        assert!(check_bugzilla_ticket(&"1".repeat(51)).is_err());
        assert!(check_bugzilla_ticket(&"1".repeat(50)).is_ok());
    }

    #[test]
    fn test_priority_name() {
        assert!(check_priority_name("proj_a_prio").is_ok());
        assert!(check_priority_name("gpu-boost-2").is_ok());
        assert!(check_priority_name("a").is_err());
        assert!(check_priority_name(&"a".repeat(51)).is_err());
        assert!(check_priority_name("-leading").is_err());
        assert!(check_priority_name("trailing-").is_err());
        assert!(check_priority_name("has space").is_err());
        assert!(check_priority_name("dot.ted").is_err());
    }

    #[test]
    fn test_username() {
        assert!(check_username("bob").is_ok());
        assert!(check_username("j.doe-2").is_ok());
        assert!(check_username("b").is_err());
        assert!(check_username("2bob").is_err());
        assert!(check_username("bob_smith").is_err());
    }

    #[test]
    fn test_slurm_project() {
        assert!(check_slurm_project("proj_a").is_ok());
        assert!(check_slurm_project("s1234.a-b").is_ok());
        assert!(check_slurm_project("").is_err());
        assert!(check_slurm_project("proj;rm").is_err());
    }

    #[test]
    fn test_normalize_usernames() {
        let raw = vec!["bob\ncarol", "  dave, bob ", ""];
        assert_eq!(normalize_usernames(raw), vec!["bob", "carol", "dave"]);
    }
}
