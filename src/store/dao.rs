pub mod dao_trait;
pub mod memory;
pub mod postgres;

pub use dao_trait::CullDao;
pub use memory::MemoryDao;
pub use postgres::PgCullDao;
