//! Shared runtime home and managed git hooks.

pub mod home;
pub mod hooks;

pub use home::{ensure_runtime_home, kittify_home, read_installed_version, RuntimeHome};
pub use hooks::{
    install_project_hook_shims, is_managed_shim, remove_project_hook_shims, MANAGED_SHIM_MARKER,
};
