//! Contact domain models: operations, identity, audience edits and channels.

pub mod audience;
pub mod channel;
pub mod identity;
pub mod operation;


pub use audience::{
    AttributeUpdate, AttributeUpdateType, ScopedSubscriptionListUpdate, SubscriptionListUpdateType,
    TagGroupUpdate, TagGroupUpdateType,
};
pub use channel::{
    AssociatedChannel, ChannelScope, ChannelType, ContactChannel, EmailRegistrationOptions,
    OpenRegistrationOptions, SmsRegistrationOptions,
};
pub use identity::{AnonymousData, AuthToken, ConflictEvent, ContactIdInfo, IdentityState};
pub use operation::{ContactOperation, OperationEntry, OperationKind};
