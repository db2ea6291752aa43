//! Services Module
//!
//! 비즈니스 로직을 담당하는 서비스 레이어
//!
//! # Services
//! - `DepositReconciler`: 체인 잔고 → 원장 입금 반영
//! - `SweepOrchestrator` / `GasStation`: 입금 주소 → 마스터 볼트 이동
//! - `WithdrawalService`: 출금 예약/브로드캐스트/환불 상태 머신
//! - `WalletService`: 지갑 생성·가져오기, 스왑, 관리자 잔고 조정
//! - `AdminService`: 관리자 조회와 일괄 작업
//! - `PinService`: 출금 PIN
//!
//! 체인 접근은 `ChainClient` trait 뒤에 있고 각 서비스에 주입된다.

pub mod admin;
pub mod chain;
pub mod locks;
pub mod pin;
pub mod reconciler;
pub mod secret_codec;
pub mod sweep;
pub mod units;
pub mod wallet;
pub mod withdrawal;

pub use admin::{AdminService, IntegrityEntry, IntegrityStatus, PlatformStatus, ReconcileSummary};
pub use chain::{ChainClient, ChainError, EthersChain};
pub use locks::AddressLocks;
pub use pin::PinService;
pub use reconciler::{DepositReconciler, ReconcileOutcome};
pub use secret_codec::SecretCodec;
pub use sweep::{GasStation, SweepOrchestrator, SweepOutcome};
pub use wallet::{AdminFundsRequest, ImportKind, SwapRequest, WalletService};
pub use withdrawal::{WithdrawalReceipt, WithdrawalRequest, WithdrawalService};
