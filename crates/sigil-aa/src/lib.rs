//! ERC-4337 v0.7 client: build, sign, submit, and confirm UserOperations
//! against an EntryPoint through a bundler relay.

pub mod account;
pub mod builder;
pub mod bundler;
pub mod contracts;
pub mod flows;
pub mod gas;
pub mod hash;
pub mod paymaster;
pub mod progress;
pub mod reader;
pub mod retry;
pub mod session;
pub mod signature;
pub mod user_op;

pub use account::{connect, load_account, AccountOverview, ConnectError, Connection};
pub use builder::{encode_execute, BuildError, OperationBuilder, OperationConfig};
pub use bundler::{BundlerClient, BundlerError, UserOperationReceipt};
pub use flows::{AccountClient, FlowError, SentOperation};
pub use gas::GasConfig;
pub use hash::resolve_user_op_hash;
pub use paymaster::{PaymasterConfig, PaymasterError};
pub use progress::{Progress, ProgressEvent, ProgressLevel, ProgressLog, ProgressSink, TracingSink};
pub use reader::{ChainReader, EvmChainReader, ReadError, SessionKeyStatus};
pub use retry::RetryPolicy;
pub use session::{SessionKeyData, SessionKeyError, DEFAULT_SESSION_VALIDITY};
pub use signature::{
    sign_as_owner, sign_multi_owner, sign_single_owner, sign_with_session_key, CollectedSignature,
    OwnerSignatures, SignatureEnvelope, SignatureMode, SigningError,
};
pub use user_op::{RpcUserOperation, SignedUserOperation, UserOpError, UserOperation};
