//! Roles, modules, actions and permissions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::AccessError;

/// A role a user can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full administrative access.
    Admin,
    /// Team lead: oversees claims, denials and reporting.
    Manager,
    /// Medical coder.
    Coder,
    /// Billing specialist.
    Billing,
    /// Read-mostly compliance reviewer.
    Auditor,
}

impl Role {
    /// Every role, in declaration order.
    pub const ALL: [Role; 5] = [
        Role::Admin,
        Role::Manager,
        Role::Coder,
        Role::Billing,
        Role::Auditor,
    ];

    /// Wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Coder => "coder",
            Role::Billing => "billing",
            Role::Auditor => "auditor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Role::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| AccessError::UnknownRole(s.to_string()))
    }
}

/// An application module gated by the access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    /// Landing dashboard.
    Dashboard,
    /// Claims worklist and editor.
    Claims,
    /// Denial management.
    Denials,
    /// Code assignment.
    Coding,
    /// Invoicing and statements.
    Billing,
    /// Payment posting.
    Payments,
    /// Reporting and exports.
    Reports,
    /// User administration.
    Users,
    /// Organization settings.
    Settings,
    /// Audit trail.
    AuditLog,
    /// Third-party integrations. Not yet granted to any role.
    Integrations,
}

impl Module {
    /// Every module, in declaration order.
    pub const ALL: [Module; 11] = [
        Module::Dashboard,
        Module::Claims,
        Module::Denials,
        Module::Coding,
        Module::Billing,
        Module::Payments,
        Module::Reports,
        Module::Users,
        Module::Settings,
        Module::AuditLog,
        Module::Integrations,
    ];

    /// Display name of the module.
    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Dashboard => "Dashboard",
            Module::Claims => "Claims",
            Module::Denials => "Denials",
            Module::Coding => "Coding",
            Module::Billing => "Billing",
            Module::Payments => "Payments",
            Module::Reports => "Reports",
            Module::Users => "Users",
            Module::Settings => "Settings",
            Module::AuditLog => "AuditLog",
            Module::Integrations => "Integrations",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts the display name or its snake/kebab-case spelling, ignoring case
/// (`AuditLog`, `audit_log`, `audit-log`).
impl FromStr for Module {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect();
        Module::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(&normalized))
            .ok_or_else(|| AccessError::UnknownModule(s.to_string()))
    }
}

/// An operation on a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Read access.
    View,
    /// Create records.
    Create,
    /// Modify records.
    Edit,
    /// Remove records.
    Delete,
    /// Download or export data.
    Export,
}

impl Action {
    /// Every action.
    pub const ALL: [Action; 5] = [
        Action::View,
        Action::Create,
        Action::Edit,
        Action::Delete,
        Action::Export,
    ];

    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Create => "create",
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::Export => "export",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Action::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| AccessError::UnknownAction(s.to_string()))
    }
}

/// Actions a role may perform on one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Permission {
    /// Module the grant applies to.
    pub module: Module,
    /// Granted actions.
    pub actions: &'static [Action],
}

impl Permission {
    /// Returns true if `action` is granted.
    pub fn allows(&self, action: Action) -> bool {
        self.actions.contains(&action)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.module)?;
        for (i, action) in self.actions.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{action}")?;
        }
        Ok(())
    }
}
