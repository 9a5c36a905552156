pub mod config;
pub mod driver;
pub mod ids;
pub mod paging;
pub mod row;
pub mod value;

pub use config::{
    load_config_from_path, ConfigError, PoolOptions, StoreConfig, StoreOptions, DEFAULT_MAX_PAGE_SIZE, DEFAULT_PORT,
};
pub use driver::{Connector, ConnectOptions, CqlSession, Credentials, DriverError, ResultSet, RowStream};
pub use ids::{IdGenerator, UuidIdGenerator};
pub use paging::{DataPage, PagingParams};
pub use row::Row;
pub use value::{FromValue, Value};
