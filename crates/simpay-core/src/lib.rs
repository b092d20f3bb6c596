//! # simpay-core
//!
//! Request flow behind payment form submissions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────────┐   ┌───────────┐   ┌──────────┐
//! │   Gate   │──▶│ Normalizer │──▶│ Args Builder │──▶│  Gateway  │──▶│ Response │
//! │ (checks) │   │ (FormRepo) │   │ (+pre hooks) │   │ (Stripe)  │   │(+observe)│
//! └──────────┘   └────────────┘   └──────────────┘   └───────────┘   └──────────┘
//!       │               │                 │                 │
//!       └───────────────┴─────────────────┴─────────────────┴──▶ 400 {message}
//! ```
//!
//! The `ProcessorGateway` trait keeps the controllers independent of the
//! processor SDK; `FormRepository` and `PermissionCheck` keep them independent
//! of where forms and authorization state live.

pub mod args;
pub mod controller;
pub mod error;
pub mod form;
pub mod gate;
pub mod gateway;
pub mod hooks;
pub mod request;
pub mod response;

pub use args::{PaymentObjectArgs, FORM_ID_METADATA_KEY};
pub use controller::{
    AllowAllPaymentMethods, CustomerController, FlowStage, PaymentIntentController,
    PaymentMethodPolicy,
};
pub use error::{FlowError, Result};
pub use form::{
    ApiCredentials, ApiMode, FormData, FormDefinition, FormField, FormId, FormRepository,
    FormValues, MemoryFormRepository, PaymentMethodType,
};
pub use gate::{NonceIssuer, PermissionCheck, PermissionGate};
pub use gateway::{ProcessorGateway, ProcessorObject};
pub use hooks::{HookContext, HookRegistry, PostCallHook, PreCallHook};
pub use request::{RawRequest, RequestNormalizer};
pub use response::ResponseEnvelope;
