//! Identity, session and profile handling for Detectify.
//! Keep the public surface thin and split implementation across sub-modules.

mod model;
mod role;
mod provider;
mod store;
mod hub;
mod latch;
mod resolver;
mod callback;
mod login;
mod gate;
mod bootstrap;
mod account;
mod password;
mod admin;
mod memory;
mod rest;
mod backend;
mod clients;
pub mod testing;

pub use model::{Identity, LinkedMethod, Profile, ProfilePatch, ProfileUpsert, Session, UserUpdate};
pub use role::{Role, RoleParseError};
pub use provider::{AuthError, CapabilityProvider, IdentityAdmin, OAuthProvider, SignUpResult};
pub use store::{ProfileStore, StoreError, UNDEFINED_TABLE};
pub use hub::{SessionEvent, SessionHub, SessionSubscription};
pub use latch::{CallbackLatches, LatchGuard, LatchState, OnceLatch};
pub use resolver::{is_deep_link, resolve_redirect, RedirectTarget};
pub use callback::{CallbackFlow, CallbackOutcome, CallbackParams, CallbackParseError, CallbackState, CallbackTiming, Navigation, LOGIN_PATH};
pub use login::{LoginFailure, LoginFlow, SignUpForm, SignUpOutcome};
pub use gate::{AdminContext, GateDecision, RoleGate};
pub use bootstrap::{derive_display_name, ensure_profile, BootstrapOutcome};
pub use account::{AccountError, AccountService, AccountView};
pub use password::{PasswordRequirements, Strength, MIN_PASSWORD_LEN};
pub use admin::{users_csv, AdminError, AdminUsers, UserRow, UserStats};
pub use memory::{MemoryAuthClient, MemoryBackend, MemoryProfileStore, Outbound};
pub use rest::{RestAdmin, RestApi, RestAuth, RestProfileStore};
pub use backend::{Backend, MemoryStack, RestStack};
pub use clients::{Client, ClientRegistry};
