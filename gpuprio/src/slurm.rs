//! SLURM administrative command generation.
//!
//! Everything here is a pure function of an accepted request: the same inputs
//! always render byte-identical commands, so regenerating after a rename or a
//! membership change is reproducible. Nothing in this module talks to the
//! cluster; administrators run the rendered commands themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Priority weight given to every generated QOS
pub const QOS_PRIORITY: u32 = 1000;

/// Timestamp layout accepted by `at -t` (`[[CC]YY]MMDDhhmm`)
pub const AT_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M";

/// Inputs to command generation, borrowed from an accepted request.
#[derive(Debug, Clone)]
pub struct CommandInput<'a> {
    pub priority_name: &'a str,
    pub gpu_type: &'a str,
    pub gpu_count: i32,
    pub slurm_project: &'a str,
    pub requester: &'a str,
    pub additional_usernames: &'a [String],
    pub valid_until: DateTime<Utc>,
    pub duration_days: i32,
}

/// The cached command set of an accepted request, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SchedulerCommands {
    /// `sacctmgr add qos ...`
    pub create_qos: String,
    /// One `sacctmgr modify user ...` per user, requester first
    pub assign_users: Vec<String>,
    /// Deferred removal handed to `at`
    pub schedule_removal: String,
}

impl SchedulerCommands {
    /// All commands as one ordered sequence.
    pub fn to_vec(&self) -> Vec<String> {
        std::iter::once(self.create_qos.clone())
            .chain(self.assign_users.iter().cloned())
            .chain(std::iter::once(self.schedule_removal.clone()))
            .collect()
    }
}

/// Requester first, then additional usernames in insertion order, without repeats.
pub fn users_in_order(requester: &str, additional_usernames: &[String]) -> Vec<String> {
    let mut users = vec![requester.to_string()];
    for username in additional_usernames {
        if !users.iter().any(|u| u == username) {
            users.push(username.clone());
        }
    }
    users
}

/// The command that removes a QOS without prompting.
pub fn removal_command(priority_name: &str) -> String {
    format!("sacctmgr -i delete qos {priority_name}")
}

/// Format a point in time for `at -t`, in UTC.
///
/// `at` reads the stamp in the zone named by `TZ`, so the rendered
/// `schedule_removal` command must run on a UTC host or under `TZ=UTC`.
pub fn at_timestamp(at_time: DateTime<Utc>) -> String {
    at_time.format(AT_TIMESTAMP_FORMAT).to_string()
}

pub fn generate_commands(input: &CommandInput<'_>) -> SchedulerCommands {
    let name = input.priority_name;

    let create_qos = format!(
        "sacctmgr add qos {name} GrpTRES=gres/gpu:{}={} MaxWall={}-0 Priority={QOS_PRIORITY}",
        input.gpu_type, input.gpu_count, input.duration_days
    );

    let assign_users = users_in_order(input.requester, input.additional_usernames)
        .iter()
        .map(|user| format!("sacctmgr modify user {user} set qos+={name} where account={}", input.slurm_project))
        .collect();

    let schedule_removal = format!("echo '{}' | at -t {}", removal_command(name), at_timestamp(input.valid_until));

    SchedulerCommands {
        create_qos,
        assign_users,
        schedule_removal,
    }
}

/// Render the annotated script shown to administrators.
///
/// Contains no generation timestamp so that the output stays deterministic.
pub fn render_script(input: &CommandInput<'_>, bugzilla_ticket: &str) -> String {
    let commands = generate_commands(input);
    let users = users_in_order(input.requester, input.additional_usernames);

    let mut lines = vec![
        format!("# GPU priority commands for ticket {bugzilla_ticket}"),
        format!("# QOS name: {}", input.priority_name),
        format!("# Users: {}", users.join(", ")),
        format!("# Valid until: {} UTC", input.valid_until.format("%Y-%m-%d %H:%M")),
        String::new(),
        "# Create QOS with resource limits".to_string(),
        commands.create_qos,
        String::new(),
        "# Assign QOS to users".to_string(),
    ];
    lines.extend(commands.assign_users);
    lines.extend([
        String::new(),
        "# Schedule QOS cleanup (the at stamp is UTC; prefix TZ=UTC on hosts in another zone)".to_string(),
        commands.schedule_removal,
        String::new(),
        "# Verification commands".to_string(),
        format!("sacctmgr show qos {}", input.priority_name),
        format!("squeue -u {}", users.join(",")),
    ]);

    lines.join("\n")
}
