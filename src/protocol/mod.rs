//! Invitation handshake and consent bookkeeping.
//!
//! Connecting two peers happens in two layers. The transport opens an
//! encrypted channel; on top of it the users exchange an accept/deny
//! control message. Only a peer that is transport-connected **and**
//! authorized counts as connected.
//!
//! ## Message Flow
//!
//! ```text
//! B (inviter)                              A (invitee)
//!    |                                        |
//!    |------ transport invite -------------->|  A: table[B] per ConsentPolicy
//!    |                                        |  A: invitation hook
//!    |<----- transport accept ---------------|
//!    |                                        |
//!    |<----- {"accepted invitation": A} -----|  respond_to_invitation(true)
//!    |  B: table[A] = Authorized              |
//!    |  B: connect-result hook (Connected)    |
//!    |                                        |
//!    |<=========== opaque data =============>|
//! ```
//!
//! ## Consent States
//!
//! | State                 | Data relayed | Entered on                          |
//! |-----------------------|--------------|-------------------------------------|
//! | `Unknown`             | no           | discovery, no entry                 |
//! | `PendingLocalConsent` | no           | outbound connect, strict invitation |
//! | `Authorized`          | yes          | accepted reply, optimistic invite   |
//! | `Denied`              | no           | denied reply                        |

mod authorization;
mod message;

pub use authorization::{AuthorizationTable, ConsentPolicy, ConsentState};
pub use message::ControlMessage;

/// Protocol version
pub const PROTOCOL_VERSION: &str = "1.0";

/// Default invitation timeout (10 seconds)
pub const INVITE_TIMEOUT_SECS: u64 = 10;
