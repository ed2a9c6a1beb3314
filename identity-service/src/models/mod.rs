pub mod invite;
pub mod role;
pub mod service;
pub mod user;

pub use invite::{
    CompleteInviteResponse, CreateInviteRequest, GenerateOtpRequest, Invite, InviteKind,
    InvitePatch, InviteResponse, InviteState, PatchField, PatchOp, ValidateOtpRequest,
};
pub use role::{Role, UpdateServiceRoleRequest, ADMIN_ROLE};
pub use service::{Service, ServiceRole};
pub use user::{
    AuthenticateRequest, SecondFactorActivateRequest, SecondFactorMethod, User, UserResponse,
};
