//! The shared database handle.

use std::fmt;
use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use quarry_core::{DriverError, Grammar, QuarryError, Result, Statement, Value};
use quarry_types::Dialect;

use crate::config::DatabaseConfig;
use crate::connection::{Connection, Record, StatementResult};
use crate::encryption::Encrypter;
use crate::entity::Entity;
use crate::events::{Listener, ModelEvent, Propagation};
use crate::model::{Model, ModelBuilder, ModelMeta};
use crate::model_query::ModelQuery;
use crate::registry::{MorphMap, Registry};

/// Opens a connection the first time one is needed.
pub type Connector = Box<dyn Fn(&DatabaseConfig) -> std::result::Result<Box<dyn Connection>, DriverError> + Send + Sync>;

/// One executed statement, as recorded by the query log.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryLogEntry {
    pub sql: String,
    pub params: Vec<Value>,
    pub elapsed: Duration,
}

pub(crate) struct Inner {
    config: DatabaseConfig,
    dialect: Dialect,
    connector: Connector,
    connection: Mutex<Option<Box<dyn Connection>>>,
    registry: RwLock<Registry>,
    listeners: RwLock<HashMap<(String, ModelEvent), Vec<Listener>>>,
    query_log: Mutex<Option<Vec<QueryLogEntry>>>,
    encrypter: Option<Encrypter>,
    pub(crate) transaction_depth: AtomicU32,
}

/// Handle shared by every entity and query; cloning is cheap.
///
/// The connection is opened lazily on first use, so a handle can be built and
/// models registered before the store is reachable.
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Arc<Inner>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("dialect", &self.inner.dialect)
            .field("connected", &self.is_connected())
            .field("transaction_level", &self.transaction_level())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Builds a handle that connects through `connector` on first use.
    pub fn new<F>(config: DatabaseConfig, connector: F) -> Result<Self>
    where
        F: Fn(&DatabaseConfig) -> std::result::Result<Box<dyn Connection>, DriverError> + Send + Sync + 'static,
    {
        let encrypter = config.key_bytes()?.map(Encrypter::new);
        let log = config.log_queries.then(Vec::new);
        Ok(Self {
            inner: Arc::new(Inner {
                dialect: config.dialect,
                config,
                connector: Box::new(connector),
                connection: Mutex::new(None),
                registry: RwLock::new(Registry::default()),
                listeners: RwLock::new(HashMap::new()),
                query_log: Mutex::new(log),
                encrypter,
                transaction_depth: AtomicU32::new(0),
            }),
        })
    }

    /// Wraps an already open connection.
    pub fn from_connection<C>(config: DatabaseConfig, connection: C) -> Result<Self>
    where
        C: Connection + 'static,
    {
        let mut config = config;
        config.dialect = connection.dialect();
        let db = Self::new(config, |_| Err("connection was closed".into()))?;
        *db.lock_connection() = Some(Box::new(connection));
        Ok(db)
    }

    /// SQLite database at `config.path`, opened lazily.
    #[cfg(feature = "rusqlite")]
    pub fn sqlite(config: DatabaseConfig) -> Result<Self> {
        let config = DatabaseConfig {
            dialect: Dialect::SQLite,
            ..config
        };
        Self::new(config, |config| {
            let conn = crate::connection::SqliteConnection::open_path(&config.path)?;
            Ok(Box::new(conn) as Box<dyn Connection>)
        })
    }

    /// Private in-memory SQLite database.
    #[cfg(feature = "rusqlite")]
    pub fn in_memory() -> Result<Self> {
        Self::sqlite(DatabaseConfig::memory())
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.dialect
    }

    pub fn grammar(&self) -> Grammar {
        Grammar::new(self.inner.dialect)
    }

    pub(crate) fn encrypter(&self) -> Option<&Encrypter> {
        self.inner.encrypter.as_ref()
    }

    // -------------------------------------------------------------------------
    // Models
    // -------------------------------------------------------------------------

    /// Resolves and stores `M`'s declarations.
    pub fn register<M: Model>(&self) -> Result<Arc<ModelMeta>> {
        self.register_builder(M::define(ModelBuilder::new(M::NAME)))
    }

    /// Registers a model declared without a Rust type.
    pub fn register_builder(&self, builder: ModelBuilder) -> Result<Arc<ModelMeta>> {
        let meta = builder.build()?;
        #[cfg(feature = "tracing")]
        tracing::debug!(model = %meta.name(), table = %meta.table(), "quarry.register");
        Ok(self.write_registry().insert(meta))
    }

    pub fn meta(&self, model: &str) -> Result<Arc<ModelMeta>> {
        self.read_registry().get(model)
    }

    /// Maps a polymorphic type value to a registered model name.
    pub fn morph_alias(&self, alias: impl Into<String>, model: impl Into<String>) {
        self.write_registry().morphs_mut().insert(alias, model);
    }

    pub fn morph_map(&self) -> MorphMap {
        self.read_registry().morphs().clone()
    }

    /// Type value written for entities of `meta`.
    pub(crate) fn morph_type_of(&self, meta: &ModelMeta) -> String {
        self.read_registry()
            .morphs()
            .alias_for(meta.name())
            .unwrap_or(meta.morph_alias())
            .to_string()
    }

    /// Every type value that resolves to `meta`.
    pub(crate) fn morph_types_of(&self, meta: &ModelMeta) -> Vec<Value> {
        let registry = self.read_registry();
        let aliases = registry.morphs().aliases_for(meta.name());
        if aliases.is_empty() {
            return vec![Value::Text(meta.morph_alias().to_string())];
        }
        aliases.into_iter().map(Value::from).collect()
    }

    pub(crate) fn resolve_morph(&self, alias: &str) -> Result<Arc<ModelMeta>> {
        self.read_registry().resolve_morph(alias)
    }

    pub fn query(&self, model: &str) -> Result<ModelQuery> {
        Ok(ModelQuery::new(self.clone(), self.meta(model)?))
    }

    /// New, unsaved entity of `model` with its declared defaults.
    pub fn new_entity(&self, model: &str) -> Result<Entity> {
        Ok(Entity::new(self.clone(), self.meta(model)?))
    }

    /// New entity filled through the mass-assignment policy.
    pub fn make<I, K, V>(&self, model: &str, attributes: I) -> Result<Entity>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut entity = self.new_entity(model)?;
        entity.fill(attributes)?;
        Ok(entity)
    }

    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.inner.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.inner.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Registers a lifecycle listener for `model`.
    pub fn listen<F>(&self, model: &str, event: ModelEvent, listener: F)
    where
        F: Fn(&mut Entity) -> Propagation + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((model.to_string(), event))
            .or_default()
            .push(Arc::new(listener));
    }

    pub(crate) fn listeners(&self, model: &str, event: ModelEvent) -> Vec<Listener> {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(model.to_string(), event))
            .cloned()
            .unwrap_or_default()
    }

    // -------------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------------

    fn lock_connection(&self) -> std::sync::MutexGuard<'_, Option<Box<dyn Connection>>> {
        self.inner.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        self.lock_connection().is_some()
    }

    /// Opens the connection now instead of on first use.
    pub fn connect(&self) -> Result<()> {
        self.with_connection("", |_| Ok(()))
    }

    /// Runs `f` against the connection, opening it first if needed. Driver
    /// errors are attributed to `sql`.
    pub(crate) fn with_connection<R>(
        &self,
        sql: &str,
        f: impl FnOnce(&mut dyn Connection) -> std::result::Result<R, DriverError>,
    ) -> Result<R> {
        let mut guard = self.lock_connection();
        if guard.is_none() {
            let conn = (self.inner.connector)(&self.inner.config)
                .map_err(|e| QuarryError::Configuration(format!("cannot connect: {e}")))?;
            #[cfg(feature = "tracing")]
            tracing::info!(dialect = %self.inner.dialect, "quarry.connect");
            *guard = Some(conn);
        }
        let conn = guard
            .as_mut()
            .ok_or_else(|| QuarryError::Configuration("no connection available".into()))?;
        f(conn.as_mut()).map_err(|e| QuarryError::persistence(sql, e))
    }

    fn run(&self, stmt: &Statement) -> Result<StatementResult> {
        quarry_core::quarry_profile_scope!("quarry", "database.run");
        quarry_core::quarry_trace_query!(&stmt.sql, stmt.params.len());
        let started = Instant::now();
        let result = self.with_connection(&stmt.sql, |conn| conn.execute(&stmt.sql, &stmt.params))?;
        self.log(&stmt.sql, &stmt.params, started.elapsed());
        Ok(result)
    }

    /// Runs a read statement and returns its rows.
    pub fn select(&self, stmt: &Statement) -> Result<Vec<Record>> {
        Ok(self.run(stmt)?.rows)
    }

    /// Runs a write statement and returns the number of affected rows.
    pub fn statement(&self, stmt: &Statement) -> Result<u64> {
        Ok(self.run(stmt)?.affected)
    }

    /// Runs an insert and returns the generated key.
    pub fn insert_get_id(&self, stmt: &Statement) -> Result<Value> {
        quarry_core::quarry_trace_query!(&stmt.sql, stmt.params.len());
        let started = Instant::now();
        let id = self.with_connection(&stmt.sql, |conn| {
            conn.execute(&stmt.sql, &stmt.params)?;
            conn.last_insert_id()
        })?;
        self.log(&stmt.sql, &stmt.params, started.elapsed());
        Ok(id)
    }

    /// Runs raw SQL without parameters, e.g. DDL.
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        quarry_core::quarry_trace_query!(sql, 0);
        let started = Instant::now();
        self.with_connection(sql, |conn| conn.exec(sql))?;
        self.log(sql, &[], started.elapsed());
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Query log
    // -------------------------------------------------------------------------

    fn query_log_guard(&self) -> std::sync::MutexGuard<'_, Option<Vec<QueryLogEntry>>> {
        self.inner.query_log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self, sql: &str, params: &[Value], elapsed: Duration) {
        if let Some(log) = self.query_log_guard().as_mut() {
            log.push(QueryLogEntry {
                sql: sql.to_string(),
                params: params.to_vec(),
                elapsed,
            });
        }
    }

    pub fn enable_query_log(&self) {
        let mut guard = self.query_log_guard();
        if guard.is_none() {
            *guard = Some(Vec::new());
        }
    }

    pub fn disable_query_log(&self) {
        *self.query_log_guard() = None;
    }

    pub fn query_log(&self) -> Vec<QueryLogEntry> {
        self.query_log_guard().clone().unwrap_or_default()
    }

    /// Empties the log, keeping it enabled.
    pub fn flush_query_log(&self) {
        if let Some(log) = self.query_log_guard().as_mut() {
            log.clear();
        }
    }
}
