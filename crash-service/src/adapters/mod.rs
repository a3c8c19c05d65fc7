// SPDX-License-Identifier: GPL-3.0-only

pub mod dbus;

pub use dbus::build_dbus_collaborators;
