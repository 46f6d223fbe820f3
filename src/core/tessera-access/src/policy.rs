//! Static access policy.
//!
//! Two tables drive every decision:
//!
//! - `RolePermissions`: what each role may do, per module ([`permissions_for`]).
//! - `ModuleAccess`: which roles may see each module ([`allowed_roles`]).
//!
//! Both are `match` expressions over closed enums, so adding a role or module
//! without deciding its access is a compile error. There is no mutation path.

use crate::{Action, Module, Permission, Role};

use crate::types::Action::{Create, Delete, Edit, Export, View};

const ALL_ACTIONS: &[Action] = &[View, Create, Edit, Delete, Export];

#[rustfmt::skip]
const ADMIN: &[Permission] = &[
    Permission { module: Module::Dashboard, actions: ALL_ACTIONS },
    Permission { module: Module::Claims, actions: ALL_ACTIONS },
    Permission { module: Module::Denials, actions: ALL_ACTIONS },
    Permission { module: Module::Coding, actions: ALL_ACTIONS },
    Permission { module: Module::Billing, actions: ALL_ACTIONS },
    Permission { module: Module::Payments, actions: ALL_ACTIONS },
    Permission { module: Module::Reports, actions: ALL_ACTIONS },
    Permission { module: Module::Users, actions: ALL_ACTIONS },
    Permission { module: Module::Settings, actions: ALL_ACTIONS },
    Permission { module: Module::AuditLog, actions: &[View, Export] },
];

#[rustfmt::skip]
const MANAGER: &[Permission] = &[
    Permission { module: Module::Dashboard, actions: &[View] },
    Permission { module: Module::Claims, actions: &[View, Create, Edit, Export] },
    Permission { module: Module::Denials, actions: &[View, Edit, Export] },
    Permission { module: Module::Coding, actions: &[View] },
    Permission { module: Module::Billing, actions: &[View, Export] },
    Permission { module: Module::Payments, actions: &[View, Export] },
    Permission { module: Module::Reports, actions: &[View, Create, Export] },
    Permission { module: Module::Users, actions: &[View] },
];

#[rustfmt::skip]
const CODER: &[Permission] = &[
    Permission { module: Module::Dashboard, actions: &[View] },
    Permission { module: Module::Claims, actions: &[View, Edit] },
    Permission { module: Module::Denials, actions: &[View] },
    Permission { module: Module::Coding, actions: &[View, Create, Edit] },
];

#[rustfmt::skip]
const BILLING: &[Permission] = &[
    Permission { module: Module::Dashboard, actions: &[View] },
    Permission { module: Module::Claims, actions: &[View, Create, Edit] },
    Permission { module: Module::Denials, actions: &[View, Edit] },
    Permission { module: Module::Billing, actions: &[View, Create, Edit, Export] },
    Permission { module: Module::Payments, actions: &[View, Create, Edit] },
    Permission { module: Module::Reports, actions: &[View] },
];

#[rustfmt::skip]
const AUDITOR: &[Permission] = &[
    Permission { module: Module::Dashboard, actions: &[View] },
    Permission { module: Module::Claims, actions: &[View, Export] },
    Permission { module: Module::Denials, actions: &[View, Export] },
    Permission { module: Module::Coding, actions: &[View, Export] },
    Permission { module: Module::Billing, actions: &[View, Export] },
    Permission { module: Module::Payments, actions: &[View, Export] },
    Permission { module: Module::Reports, actions: &[View, Export] },
    Permission { module: Module::AuditLog, actions: &[View, Export] },
];

/// Permissions granted to `role`.
pub fn permissions_for(role: Role) -> &'static [Permission] {
    match role {
        Role::Admin => ADMIN,
        Role::Manager => MANAGER,
        Role::Coder => CODER,
        Role::Billing => BILLING,
        Role::Auditor => AUDITOR,
    }
}

/// Roles admitted to `module`. An empty slice admits nobody.
pub fn allowed_roles(module: Module) -> &'static [Role] {
    use crate::types::Role::{Admin, Auditor, Billing, Coder, Manager};

    match module {
        Module::Dashboard => &[Admin, Manager, Coder, Billing, Auditor],
        Module::Claims => &[Admin, Manager, Coder, Billing, Auditor],
        Module::Denials => &[Admin, Manager, Coder, Billing, Auditor],
        Module::Coding => &[Admin, Manager, Coder, Auditor],
        Module::Billing => &[Admin, Manager, Billing, Auditor],
        Module::Payments => &[Admin, Manager, Billing, Auditor],
        Module::Reports => &[Admin, Manager, Billing, Auditor],
        Module::Users => &[Admin, Manager],
        Module::Settings => &[Admin],
        Module::AuditLog => &[Admin, Auditor],
        Module::Integrations => &[],
    }
}

/// May `role` view `module`?
pub fn can_access_module(role: Role, module: Module) -> bool {
    allowed_roles(module).contains(&role)
}

/// Same as [`can_access_module`] for a module name that arrives as text.
///
/// Names that do not resolve to a known module are denied.
pub fn can_access_module_named(role: Role, module_name: &str) -> bool {
    module_name
        .parse::<Module>()
        .map(|module| can_access_module(role, module))
        .unwrap_or(false)
}

/// Does `permissions` grant `action` on `module`?
pub fn has_action(permissions: &[Permission], module: Module, action: Action) -> bool {
    permissions
        .iter()
        .any(|p| p.module == module && p.allows(action))
}

/// May `role` perform `action` on `module`?
///
/// Requires both module admission and an explicit action grant.
pub fn can(role: Role, action: Action, module: Module) -> bool {
    can_access_module(role, module) && has_action(permissions_for(role), module, action)
}

/// Modules `role` may view, in declaration order.
pub fn accessible_modules(role: Role) -> Vec<Module> {
    Module::ALL
        .into_iter()
        .filter(|m| can_access_module(role, *m))
        .collect()
}
