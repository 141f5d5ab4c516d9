//! Session-scoped secure namespaces.
//!
//! Cooperating processes belonging to one logical session discover shared
//! kernel objects (events, synchronization primitives) through a private
//! namespace whose boundary requires the Everyone SID plus a Medium
//! integrity label. The boundary keeps unrelated sessions and lower-trust
//! (sandboxed) processes out; the namespace keeps object names from
//! colliding between concurrently running sessions.
//!
//! The session manager calls [`SessionNamespace::create`] once; every other
//! collaborator calls [`SessionNamespace::open`] and addresses objects as
//! `<namespace>\<ObjectName>` (see [`namespace_object_name`]).

mod boundary;
mod error;
mod namespace;
#[cfg(windows)]
mod security;

pub use boundary::BoundaryDescriptor;
pub use boundary::RequiredPrincipal;
pub use error::NamespaceError;
pub use error::Result;
pub use namespace::NAMESPACE_NAME_MAX_LEN;
pub use namespace::NAMESPACE_PREFIX;
pub use namespace::namespace_object_name;
pub use namespace::session_namespace_name;
#[cfg(windows)]
pub use namespace::SessionNamespace;
