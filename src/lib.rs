pub mod sql;

pub mod resolver;
pub use resolver::{
    ConnectionArgs, EquiJoin, FetchResult, JoinSpec, ProvidedJoin, ResolverError, ResolverFactory,
    ResolverId, ResolverOptions, ResolverTree, Row, UnionJoin,
};

pub mod executor;
pub use executor::{CapturingExecutor, MemoryExecutor, RowExecutor};
