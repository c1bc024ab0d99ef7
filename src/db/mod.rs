use std::sync::{Arc, LazyLock};

use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::instrument;

use crate::db::models::TipId;
use crate::util::env::{self, StoreBackend, Var};
use crate::var;

pub mod memory;
pub mod models;
pub mod repositories;

pub mod prelude {
    pub use crate::db::{StoreError, StoreResult};

    pub use crate::db::models::leaderboard::LeaderboardEntry;
    pub use crate::db::models::tip::{DailyStats, Tip, TipDraft};
    pub use crate::db::models::{Amount, TipId};

    pub use crate::db::memory::MemoryStore;
    pub use crate::db::repositories::leaderboard::LeaderboardRepository;
    pub use crate::db::repositories::tip::TipRepository;
    pub use crate::db::repositories::{Appended, LeaderboardStore, TipStore};
}

use prelude::{LeaderboardStore, TipStore};

static DB_POOL: LazyLock<OnceCell<Db>> = LazyLock::new(OnceCell::new);
pub async fn db_pool() -> StoreResult<&'static PgPool> {
    Ok(&DB_POOL
        .get_or_try_init(|| async { Db::new_pool().await })
        .await?
        .pool)
}

struct Db {
    pool: PgPool,
}

impl Db {
    #[instrument]
    async fn new_pool() -> StoreResult<Self> {
        let db_url = var!(Var::DatabaseUrl).await?;
        let pool = sqlx::PgPool::connect(db_url).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("database migrations applied");

        Ok(Self { pool })
    }
}

/// Both halves of the storage layer, as trait objects so that the pipeline doesn't care which
/// backend it is running against
#[derive(Clone)]
pub struct Stores {
    pub tips: Arc<dyn TipStore>,
    pub leaderboard: Arc<dyn LeaderboardStore>,
}

impl Stores {
    pub fn memory() -> Self {
        let store = Arc::new(prelude::MemoryStore::new());
        Self {
            tips: store.clone(),
            leaderboard: store,
        }
    }

    pub fn postgres(pool: &'static PgPool) -> Self {
        Self {
            tips: Arc::new(prelude::TipRepository::new(pool)),
            leaderboard: Arc::new(prelude::LeaderboardRepository::new(pool)),
        }
    }

    #[instrument]
    pub async fn connect(backend: StoreBackend) -> StoreResult<Self> {
        match backend {
            StoreBackend::Memory => {
                tracing::warn!("using in-memory stores; tips will not survive a restart");
                Ok(Self::memory())
            }
            StoreBackend::Postgres => Ok(Self::postgres(db_pool().await?)),
        }
    }
}

pub type StoreResult<T> = core::result::Result<T, StoreError>;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),

    #[error(transparent)]
    MigrateError(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    EnvError(#[from] env::EnvErr),

    #[error("tip '{0}' is not present in the tip log")]
    UnknownTip(TipId),

    #[error("leaderboard total for '{0}' would overflow")]
    TotalOverflow(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
