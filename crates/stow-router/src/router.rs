use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use stow_crypto::{hash_file, ContentDigest};
use stow_ring::{HashRing, Placement};
use stow_store::{
    BackendConfig, BrowseOptions, Connection, DownloadOptions, Driver, FetchOptions,
    InMemoryDriver, Instance, LocalDriver, RemoveOptions, StoreError, Stream, UploadOptions,
};
use stow_types::{FileHandle, Health, DEFAULT_BACKEND};
use tracing::{debug, info, warn};

use crate::config::{check_weight, FileSettings, HostConfig};
use crate::error::{RouterError, RouterResult};
use crate::instance::LiveInstance;
use crate::lifecycle::{Lifecycle, RegistrationMode};

/// Driver name of the built-in in-memory backend.
pub const MEMORY_DRIVER: &str = "memory";

/// Builds the placement strategy from `{backend: weight}` at open time.
pub type PlacementBuilder =
    Arc<dyn Fn(&BTreeMap<String, i64>) -> Box<dyn Placement> + Send + Sync>;

struct RouterState {
    lifecycle: Lifecycle,
    files: FileSettings,
    configs: BTreeMap<String, BackendConfig>,
    drivers: BTreeMap<String, Arc<dyn Driver>>,
    instances: HashMap<String, Arc<LiveInstance>>,
    placement: Option<Box<dyn Placement>>,
}

/// Registry of storage backends and router for every file operation.
///
/// All state sits behind one `RwLock`. Registration and lifecycle
/// transitions take the write lock; routed calls take the read lock only to
/// clone the owning [`LiveInstance`] and then run unlocked.
pub struct Router {
    mode: RegistrationMode,
    placement_builder: PlacementBuilder,
    state: RwLock<RouterState>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// A router in `Override` mode with the built-in drivers registered.
    pub fn new() -> Self {
        Self::with_mode(RegistrationMode::default())
    }

    pub fn with_mode(mode: RegistrationMode) -> Self {
        let mut drivers: BTreeMap<String, Arc<dyn Driver>> = BTreeMap::new();
        drivers.insert(DEFAULT_BACKEND.to_string(), Arc::new(LocalDriver));
        drivers.insert(MEMORY_DRIVER.to_string(), Arc::new(InMemoryDriver));

        Self {
            mode,
            placement_builder: Arc::new(|weights: &BTreeMap<String, i64>| {
                Box::new(HashRing::new(
                    weights.iter().map(|(name, weight)| (name.clone(), *weight)),
                )) as Box<dyn Placement>
            }),
            state: RwLock::new(RouterState {
                lifecycle: Lifecycle::Unconfigured,
                files: FileSettings::default(),
                configs: BTreeMap::new(),
                drivers,
                instances: HashMap::new(),
                placement: None,
            }),
        }
    }

    /// Replace the consistent-hash ring with another placement strategy.
    pub fn with_placement(mut self, builder: PlacementBuilder) -> Self {
        self.placement_builder = builder;
        self
    }

    pub fn mode(&self) -> RegistrationMode {
        self.mode
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.read().lifecycle
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub fn register_driver(
        &self,
        name: impl Into<String>,
        driver: impl Driver + 'static,
    ) -> RouterResult<()> {
        let name = normalize(name.into());
        let mut state = self.registrable("register driver")?;
        if insert(&mut state.drivers, name.clone(), Arc::new(driver), self.mode) {
            debug!(driver = %name, "driver registered");
        }
        Ok(())
    }

    pub fn register_config(&self, name: impl Into<String>, config: BackendConfig) -> RouterResult<()> {
        let name = normalize(name.into());
        let mut state = self.registrable("register config")?;
        if insert(&mut state.configs, name.clone(), config, self.mode) {
            debug!(backend = %name, "backend config registered");
        }
        Ok(())
    }

    pub fn register_configs<I, S>(&self, configs: I) -> RouterResult<()>
    where
        I: IntoIterator<Item = (S, BackendConfig)>,
        S: Into<String>,
    {
        let mut state = self.registrable("register config")?;
        for (name, config) in configs {
            let name = normalize(name.into());
            insert(&mut state.configs, name, config, self.mode);
        }
        Ok(())
    }

    /// Apply the `[file]` and `[storage]` sections of a host config tree.
    ///
    /// Each backend table merges over whatever is already registered under
    /// its name. The whole tree is validated before anything is applied.
    pub fn configure(&self, root: &toml::Table) -> RouterResult<()> {
        let host = HostConfig::parse(root)?;
        let mut state = self.registrable("configure")?;

        host.files.apply(&mut state.files);
        for (name, patch) in host.backends {
            let name = normalize(name);
            let base = state.configs.remove(&name).unwrap_or_default();
            state.configs.insert(name, patch.apply(base));
        }
        debug!(backends = state.configs.len(), "host configuration applied");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Seal the registry. Seeds the default backend when none is registered.
    pub fn setup(&self) -> RouterResult<()> {
        let mut state = self.write();
        if !state.lifecycle.accepts_registration() {
            return Ok(());
        }

        if state.configs.is_empty() {
            state
                .configs
                .insert(DEFAULT_BACKEND.to_string(), BackendConfig::default());
        }
        for (name, config) in &state.configs {
            check_weight(name, config.weight)?;
        }
        for config in state.configs.values_mut() {
            if config.driver.is_empty() {
                config.driver = DEFAULT_BACKEND.to_string();
            }
        }

        state.lifecycle = Lifecycle::Configured;
        info!(backends = state.configs.len(), "storage registry configured");
        Ok(())
    }

    /// Connect and open every backend, then build the placement ring.
    ///
    /// On failure every connection opened so far is closed and the router
    /// stays `Configured`.
    pub fn open(&self) -> RouterResult<()> {
        let mut state = self.write();
        match state.lifecycle {
            Lifecycle::Configured => {}
            lifecycle if lifecycle.is_open() => return Ok(()),
            lifecycle => {
                return Err(RouterError::InvalidState {
                    op: "open",
                    state: lifecycle,
                })
            }
        }

        let mut instances = HashMap::with_capacity(state.configs.len());
        for (name, config) in &state.configs {
            match connect(&state.drivers, name, config) {
                Ok(live) => {
                    instances.insert(name.clone(), Arc::new(live));
                }
                Err(err) => {
                    close_all(instances.into_values());
                    return Err(err);
                }
            }
        }

        let weights: BTreeMap<String, i64> = state
            .configs
            .iter()
            .map(|(name, config)| (name.clone(), config.weight))
            .collect();
        state.placement = Some((self.placement_builder)(&weights));
        state.instances = instances;
        state.lifecycle = Lifecycle::Connected;
        info!(backends = state.instances.len(), "storage backends connected");
        Ok(())
    }

    pub fn start(&self) -> RouterResult<()> {
        let mut state = self.write();
        match state.lifecycle {
            Lifecycle::Running => Ok(()),
            Lifecycle::Connected | Lifecycle::Stopped => {
                state.lifecycle = Lifecycle::Running;
                info!("storage router started");
                Ok(())
            }
            lifecycle => Err(RouterError::InvalidState {
                op: "start",
                state: lifecycle,
            }),
        }
    }

    pub fn stop(&self) -> RouterResult<()> {
        let mut state = self.write();
        match state.lifecycle {
            Lifecycle::Stopped => Ok(()),
            Lifecycle::Connected | Lifecycle::Running => {
                state.lifecycle = Lifecycle::Stopped;
                info!("storage router stopped");
                Ok(())
            }
            lifecycle => Err(RouterError::InvalidState {
                op: "stop",
                state: lifecycle,
            }),
        }
    }

    /// Close every connection and drop the ring. Failures are logged and
    /// teardown continues. Registered drivers and configs are kept.
    pub fn close(&self) -> RouterResult<()> {
        let mut state = self.write();
        if state.lifecycle == Lifecycle::Closed {
            return Ok(());
        }
        let instances = std::mem::take(&mut state.instances);
        close_all(instances.into_values());
        state.placement = None;
        state.lifecycle = Lifecycle::Closed;
        info!("storage router closed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    /// Upload a local file, placing it by its content hash.
    pub fn upload(&self, source: &Path, opts: &UploadOptions) -> RouterResult<FileHandle> {
        check_source(source)?;
        let digest = hash_file(source)?;

        let name = {
            let state = self.read();
            let placement = state.placement.as_ref().ok_or_else(|| {
                RouterError::InvalidConnection(format!(
                    "no placement while {}",
                    state.lifecycle
                ))
            })?;
            placement
                .locate(&digest.hex)
                .map(str::to_string)
                .ok_or(RouterError::NoAvailableBackend)?
        };
        debug!(backend = %name, hash = %digest.hex, "upload placed");

        self.upload_with(&name, source, opts, Some(digest))
    }

    /// Upload a local file to a named backend.
    pub fn upload_to(
        &self,
        name: &str,
        source: &Path,
        opts: &UploadOptions,
    ) -> RouterResult<FileHandle> {
        self.upload_with(name, source, opts, None)
    }

    fn upload_with(
        &self,
        name: &str,
        source: &Path,
        opts: &UploadOptions,
        digest: Option<ContentDigest>,
    ) -> RouterResult<FileHandle> {
        let live = self.instance(name)?;

        let mut key = opts.key().map(str::to_string);
        let mut prefix = opts.prefix().and_then(trim_prefix);
        if key.is_none() && prefix.is_none() {
            prefix = trim_prefix(&live.config().prefix);
        }

        if key.is_none() {
            let digest = match digest {
                Some(digest) => digest,
                None => {
                    check_source(source)?;
                    hash_file(source)?
                }
            };
            let fan_out = digest.fan_out().unwrap_or_default();
            prefix = Some(match prefix {
                Some(base) => format!("{base}/{fan_out}"),
                None => fan_out,
            });
            key = Some(digest.token);
        }

        let mut delegated = UploadOptions::default();
        if let Some(key) = key {
            delegated = delegated.with_key(key);
        }
        if let Some(prefix) = prefix {
            delegated = delegated.with_prefix(prefix);
        }

        let file = live.connection().upload(source, &delegated)?;
        debug!(backend = %live.name(), code = %file.code(), size = file.size(), "uploaded");
        Ok(file)
    }

    /// Open the object behind `code` for reading.
    pub fn fetch(&self, code: &str, opts: &FetchOptions) -> RouterResult<Box<dyn Stream>> {
        let (file, live) = self.route(code)?;
        debug!(backend = %live.name(), file = %file.file(), "fetch");
        Ok(live.connection().fetch(&file, opts)?)
    }

    /// Materialize the object behind `code` as a local file.
    ///
    /// Without a target the cache path `download_root/backend/prefix/key[.ext]`
    /// is used; its parent directories are created first.
    pub fn download(&self, code: &str, opts: &DownloadOptions) -> RouterResult<PathBuf> {
        let (file, live) = self.route(code)?;
        let target = match &opts.target {
            Some(target) => target.clone(),
            None => cache_path(&self.download_root(), &file)?,
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| RouterError::Io {
                op: "create",
                path: parent.to_path_buf(),
                source,
            })?;
        }
        debug!(backend = %live.name(), target = ?target, "download");
        Ok(live
            .connection()
            .download(&file, &DownloadOptions::to(target))?)
    }

    pub fn remove(&self, code: &str, opts: &RemoveOptions) -> RouterResult<()> {
        let (file, live) = self.route(code)?;
        debug!(backend = %live.name(), file = %file.file(), "remove");
        Ok(live.connection().remove(&file, opts)?)
    }

    pub fn browse(&self, code: &str, opts: &BrowseOptions) -> RouterResult<String> {
        let (file, live) = self.route(code)?;
        Ok(live.connection().browse(&file, opts)?)
    }

    /// Decode a code, flagging it from the current backend configuration.
    pub fn decode(&self, code: &str) -> RouterResult<FileHandle> {
        let file = FileHandle::decode(code)?;
        let state = self.read();
        Ok(match state.configs.get(file.backend()) {
            Some(config) => file.with_flags(config.proxy, config.remote),
            None => file,
        })
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn health(&self, name: &str) -> RouterResult<Health> {
        Ok(self.instance(name)?.connection().health())
    }

    /// Health of every live backend.
    pub fn healths(&self) -> BTreeMap<String, Health> {
        let instances: Vec<Arc<LiveInstance>> = self.read().instances.values().cloned().collect();
        instances
            .iter()
            .map(|live| (live.name().to_string(), live.connection().health()))
            .collect()
    }

    /// Registered backend names with their weights.
    pub fn backends(&self) -> BTreeMap<String, i64> {
        self.read()
            .configs
            .iter()
            .map(|(name, config)| (name.clone(), config.weight))
            .collect()
    }

    pub fn backend_config(&self, name: &str) -> Option<BackendConfig> {
        self.read().configs.get(name).cloned()
    }

    pub fn file_settings(&self) -> FileSettings {
        self.read().files.clone()
    }

    pub fn download_root(&self) -> PathBuf {
        self.read().files.download.clone()
    }

    pub fn thumbnail_root(&self) -> PathBuf {
        self.read().files.thumbnail.clone()
    }

    pub fn preview_root(&self) -> PathBuf {
        self.read().files.preview.clone()
    }

    pub fn salt(&self) -> String {
        self.read().files.salt.clone()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn read(&self) -> RwLockReadGuard<'_, RouterState> {
        self.state.read().expect("router lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, RouterState> {
        self.state.write().expect("router lock poisoned")
    }

    fn registrable(&self, op: &'static str) -> RouterResult<RwLockWriteGuard<'_, RouterState>> {
        let state = self.write();
        if !state.lifecycle.accepts_registration() {
            return Err(RouterError::Sealed {
                op,
                state: state.lifecycle,
            });
        }
        Ok(state)
    }

    fn instance(&self, name: &str) -> RouterResult<Arc<LiveInstance>> {
        let name = if name.is_empty() { DEFAULT_BACKEND } else { name };
        self.read()
            .instances
            .get(name)
            .cloned()
            .ok_or_else(|| RouterError::InvalidConnection(name.to_string()))
    }

    fn route(&self, code: &str) -> RouterResult<(FileHandle, Arc<LiveInstance>)> {
        let file = FileHandle::decode(code)?;
        let live = self.instance(file.backend())?;
        let file = file.with_flags(live.config().proxy, live.config().remote);
        Ok((file, live))
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("Router")
            .field("mode", &self.mode)
            .field("lifecycle", &state.lifecycle)
            .field("backends", &state.configs.keys().collect::<Vec<_>>())
            .field("drivers", &state.drivers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn normalize(name: String) -> String {
    if name.is_empty() {
        DEFAULT_BACKEND.to_string()
    } else {
        name
    }
}

/// Returns `true` when the map changed.
fn insert<V>(map: &mut BTreeMap<String, V>, name: String, value: V, mode: RegistrationMode) -> bool {
    match mode {
        RegistrationMode::FirstWins if map.contains_key(&name) => {
            debug!(name = %name, "duplicate registration ignored");
            false
        }
        _ => {
            map.insert(name, value);
            true
        }
    }
}

fn connect(
    drivers: &BTreeMap<String, Arc<dyn Driver>>,
    name: &str,
    config: &BackendConfig,
) -> RouterResult<LiveInstance> {
    let driver = drivers
        .get(&config.driver)
        .ok_or_else(|| RouterError::InvalidDriver(config.driver.clone()))?;
    let instance = Instance::new(name, config.clone());
    let conn = driver
        .connect(&instance)
        .map_err(|source| RouterError::Connect {
            backend: name.to_string(),
            source,
        })?;
    if let Err(source) = conn.open() {
        close_connection(name, conn.as_ref());
        return Err(RouterError::Connect {
            backend: name.to_string(),
            source,
        });
    }
    debug!(backend = %name, driver = %config.driver, weight = config.weight, "backend opened");
    Ok(LiveInstance::new(instance, conn))
}

fn close_all(instances: impl IntoIterator<Item = Arc<LiveInstance>>) {
    for live in instances {
        close_connection(live.name(), live.connection());
    }
}

fn close_connection(name: &str, conn: &dyn Connection) {
    if let Err(err) = conn.close() {
        warn!(backend = %name, error = %err, "failed to close storage backend");
    }
}

/// Strip surrounding slashes; a prefix of only slashes is no prefix.
fn trim_prefix(prefix: &str) -> Option<String> {
    let trimmed = prefix.trim_matches('/');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn check_source(source: &Path) -> RouterResult<()> {
    let meta = fs::metadata(source).map_err(|e| StoreError::io("stat", source, e))?;
    if meta.is_dir() {
        return Err(StoreError::Unsupported(format!("directory upload: {}", source.display())).into());
    }
    Ok(())
}

/// `root/backend/prefix/key[.ext]`, refusing anything that leaves `root` or
/// does not name a file.
fn cache_path(root: &Path, file: &FileHandle) -> RouterResult<PathBuf> {
    if file.key().is_empty() || file.key().ends_with('/') {
        return Err(StoreError::InvalidPath(file.file()).into());
    }
    let relative = Path::new(file.backend()).join(file.file());
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(StoreError::InvalidPath(relative.display().to_string()).into());
    }
    Ok(root.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::thread;
    use stow_types::codec;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        router: Router,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_router(Router::new())
        }

        fn with_router(router: Router) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut root = toml::Table::new();
            let mut file = toml::Table::new();
            file.insert(
                "download".into(),
                toml::Value::String(dir.path().join("download").display().to_string()),
            );
            root.insert("file".into(), toml::Value::Table(file));
            router.configure(&root).unwrap();
            Self { dir, router }
        }

        fn local(&self, name: &str) -> BackendConfig {
            local_config(&self.dir.path().join("storage").join(name))
        }

        fn open_default(self) -> Self {
            self.router.register_config("default", self.local("default")).unwrap();
            self.router.setup().unwrap();
            self.router.open().unwrap();
            self
        }

        fn source(&self, name: &str, content: &[u8]) -> PathBuf {
            let path = self.dir.path().join("src").join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            path
        }

        fn read_all(&self, code: &str, opts: &FetchOptions) -> Vec<u8> {
            let mut out = Vec::new();
            self.router
                .fetch(code, opts)
                .unwrap()
                .read_to_end(&mut out)
                .unwrap();
            out
        }
    }

    fn local_config(root: &Path) -> BackendConfig {
        let mut config = BackendConfig::default();
        config.settings.insert(
            "storage".into(),
            toml::Value::String(root.display().to_string()),
        );
        config
    }

    fn memory(weight: i64) -> BackendConfig {
        BackendConfig {
            weight,
            ..BackendConfig::with_driver(MEMORY_DRIVER)
        }
    }

    struct Always(&'static str);

    impl Placement for Always {
        fn locate(&self, _key: &str) -> Option<&str> {
            Some(self.0)
        }
    }

    // -- lifecycle -------------------------------------------------------

    #[test]
    fn lifecycle_transitions() {
        let fx = Fixture::new();
        let router = &fx.router;
        assert_eq!(router.lifecycle(), Lifecycle::Unconfigured);
        assert!(matches!(
            router.open(),
            Err(RouterError::InvalidState { op: "open", .. })
        ));
        assert!(matches!(router.start(), Err(RouterError::InvalidState { .. })));

        router.register_config("default", fx.local("default")).unwrap();
        router.setup().unwrap();
        router.setup().unwrap();
        assert_eq!(router.lifecycle(), Lifecycle::Configured);

        router.open().unwrap();
        router.open().unwrap();
        assert_eq!(router.lifecycle(), Lifecycle::Connected);

        router.start().unwrap();
        router.start().unwrap();
        assert_eq!(router.lifecycle(), Lifecycle::Running);
        router.stop().unwrap();
        assert_eq!(router.lifecycle(), Lifecycle::Stopped);
        router.start().unwrap();
        assert_eq!(router.lifecycle(), Lifecycle::Running);

        router.close().unwrap();
        router.close().unwrap();
        assert_eq!(router.lifecycle(), Lifecycle::Closed);
        assert!(matches!(router.stop(), Err(RouterError::InvalidState { .. })));
        assert!(matches!(router.open(), Err(RouterError::InvalidState { .. })));
    }

    #[test]
    fn registration_is_sealed_by_setup() {
        let fx = Fixture::new();
        fx.router.setup().unwrap();
        assert!(matches!(
            fx.router.register_config("late", BackendConfig::default()),
            Err(RouterError::Sealed { .. })
        ));
        assert!(matches!(
            fx.router.register_driver("late", LocalDriver),
            Err(RouterError::Sealed { .. })
        ));
        assert!(matches!(
            fx.router.configure(&toml::Table::new()),
            Err(RouterError::Sealed { .. })
        ));
    }

    #[test]
    fn setup_seeds_default_backend() {
        let router = Router::new();
        router.setup().unwrap();
        let backends = router.backends();
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[DEFAULT_BACKEND], 1);
        assert_eq!(
            router.backend_config(DEFAULT_BACKEND).unwrap().driver,
            DEFAULT_BACKEND
        );
    }

    #[test]
    fn setup_normalizes_empty_driver() {
        let router = Router::new();
        router
            .register_config("x", BackendConfig::with_driver(""))
            .unwrap();
        router.setup().unwrap();
        assert_eq!(router.backend_config("x").unwrap().driver, DEFAULT_BACKEND);
    }

    #[test]
    fn override_mode_replaces() {
        let router = Router::new();
        router.register_config("a", memory(2)).unwrap();
        router.register_config("a", memory(5)).unwrap();
        assert_eq!(router.backends()["a"], 5);
    }

    #[test]
    fn first_wins_mode_keeps_first() {
        let router = Router::with_mode(RegistrationMode::FirstWins);
        assert_eq!(router.mode(), RegistrationMode::FirstWins);
        router
            .register_configs([("a", memory(2)), ("a", memory(5))])
            .unwrap();
        assert_eq!(router.backends()["a"], 2);
    }

    #[test]
    fn empty_name_means_default() {
        let router = Router::new();
        router.register_config("", memory(3)).unwrap();
        assert_eq!(router.backends()[DEFAULT_BACKEND], 3);
    }

    #[test]
    fn close_then_reopen() {
        let fx = Fixture::new().open_default();
        let file = fx.router.upload(&fx.source("a.txt", b"persisted"), &UploadOptions::default()).unwrap();

        fx.router.close().unwrap();
        assert!(matches!(
            fx.router.fetch(file.code(), &FetchOptions::default()),
            Err(RouterError::InvalidConnection(_))
        ));

        fx.router.register_config("mem", memory(0)).unwrap();
        fx.router.setup().unwrap();
        fx.router.open().unwrap();
        assert_eq!(fx.read_all(file.code(), &FetchOptions::default()), b"persisted");
        assert!(fx.router.healths().contains_key("mem"));
    }

    #[test]
    fn unknown_driver_leaves_router_configured() {
        let fx = Fixture::new();
        fx.router.register_config("a", memory(1)).unwrap();
        fx.router
            .register_config("b", BackendConfig::with_driver("s3"))
            .unwrap();
        fx.router.setup().unwrap();
        let err = fx.router.open().unwrap_err();
        assert!(matches!(err, RouterError::InvalidDriver(ref d) if d == "s3"));
        assert_eq!(fx.router.lifecycle(), Lifecycle::Configured);
        assert!(fx.router.healths().is_empty());
    }

    #[test]
    fn oversized_weight_fails_cleanly() {
        let router = Router::new();
        let root: toml::Table = "[storage.mem]\ndriver = \"memory\"\nweight = 9223372036854775807\n"
            .parse()
            .unwrap();
        assert!(matches!(router.configure(&root), Err(RouterError::Config(_))));

        router
            .register_config("mem", memory(i64::MAX))
            .unwrap();
        assert!(matches!(router.setup(), Err(RouterError::Config(_))));
        assert_eq!(router.lifecycle(), Lifecycle::Unconfigured);
        assert!(matches!(router.open(), Err(RouterError::InvalidState { .. })));

        // The router is still usable once the weight is fixed.
        router.register_config("mem", memory(stow_ring::MAX_WEIGHT)).unwrap();
        router.setup().unwrap();
        router.open().unwrap();
        assert_eq!(router.lifecycle(), Lifecycle::Connected);
    }

    #[test]
    fn connect_failure_is_reported() {
        let fx = Fixture::new();
        let mut config = BackendConfig::default();
        config
            .settings
            .insert("storage".into(), toml::Value::Integer(7));
        fx.router.register_config("default", config).unwrap();
        fx.router.setup().unwrap();
        let err = fx.router.open().unwrap_err();
        assert!(matches!(err, RouterError::Connect { ref backend, .. } if backend == "default"));
        assert_eq!(fx.router.lifecycle(), Lifecycle::Configured);
    }

    #[test]
    fn custom_driver_registration() {
        let fx = Fixture::new();
        fx.router.register_driver("ram", InMemoryDriver).unwrap();
        fx.router
            .register_config("scratch", BackendConfig::with_driver("ram"))
            .unwrap();
        fx.router.setup().unwrap();
        fx.router.open().unwrap();
        let file = fx
            .router
            .upload(&fx.source("a", b"ram"), &UploadOptions::default())
            .unwrap();
        assert_eq!(file.backend(), "scratch");
    }

    // -- routing ---------------------------------------------------------

    #[test]
    fn end_to_end_default_backend() {
        let fx = Fixture::new().open_default();
        let source = fx.source("ten.bin", b"0123456789");
        let digest = hash_file(&source).unwrap();

        let file = fx.router.upload(&source, &UploadOptions::default()).unwrap();
        assert_eq!(file.backend(), DEFAULT_BACKEND);
        assert_eq!(file.prefix(), digest.fan_out().unwrap());
        assert_eq!(file.key(), digest.token);
        assert_eq!(file.ext(), "bin");
        assert_eq!(file.size(), 10);

        let decoded = fx.router.decode(file.code()).unwrap();
        assert_eq!(decoded.backend(), DEFAULT_BACKEND);
        assert_eq!(decoded, file);

        assert_eq!(fx.read_all(file.code(), &FetchOptions::default()), b"0123456789");
        assert_eq!(fx.read_all(file.code(), &FetchOptions::range(2, 5)), b"234");
        assert_eq!(fx.read_all(file.code(), &FetchOptions::range(-5, 0)), b"0123456789");
    }

    #[test]
    fn identical_content_same_identity() {
        let fx = Fixture::new().open_default();
        let a = fx.router.upload(&fx.source("a.txt", b"same"), &UploadOptions::default()).unwrap();
        let b = fx.router.upload(&fx.source("b.txt", b"same"), &UploadOptions::default()).unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.prefix(), b.prefix());
        assert_eq!(a.code(), b.code());

        // Both handles name one object: removing either removes it for both.
        fx.router.remove(a.code(), &RemoveOptions::default()).unwrap();
        let err = fx
            .router
            .fetch(b.code(), &FetchOptions::default())
            .err()
            .unwrap();
        assert!(err.is_not_found());
        fx.router.remove(b.code(), &RemoveOptions::default()).unwrap();
    }

    #[test]
    fn config_prefix_composes_with_fan_out() {
        let fx = Fixture::new();
        let mut config = fx.local("default");
        config.prefix = "cfg".into();
        fx.router.register_config("default", config).unwrap();
        fx.router.setup().unwrap();
        fx.router.open().unwrap();

        let source = fx.source("p.txt", b"prefixed");
        let fan_out = hash_file(&source).unwrap().fan_out().unwrap();

        let routed = fx.router.upload(&source, &UploadOptions::default()).unwrap();
        assert_eq!(routed.prefix(), format!("cfg/{fan_out}"));

        let direct = fx
            .router
            .upload_to("default", &source, &UploadOptions::default())
            .unwrap();
        assert_eq!(direct.prefix(), format!("cfg/{fan_out}"));

        let caller = fx
            .router
            .upload_to("default", &source, &UploadOptions::default().with_prefix("mine/"))
            .unwrap();
        assert_eq!(caller.prefix(), format!("mine/{fan_out}"));
    }

    #[test]
    fn slash_prefixes_are_trimmed() {
        let fx = Fixture::new();
        let mut config = fx.local("default");
        config.prefix = "/cfg/".into();
        fx.router.register_config("default", config).unwrap();
        fx.router.setup().unwrap();
        fx.router.open().unwrap();

        let source = fx.source("s.txt", b"slashes");
        let fan_out = hash_file(&source).unwrap().fan_out().unwrap();

        let routed = fx.router.upload(&source, &UploadOptions::default()).unwrap();
        assert_eq!(routed.prefix(), format!("cfg/{fan_out}"));

        let root_only = fx
            .router
            .upload_to("default", &source, &UploadOptions::default().with_prefix("/"))
            .unwrap();
        assert_eq!(root_only.prefix(), format!("cfg/{fan_out}"));

        let keyed = fx
            .router
            .upload_to(
                "default",
                &source,
                &UploadOptions::default().with_key("k").with_prefix("/docs/"),
            )
            .unwrap();
        assert_eq!(keyed.prefix(), "docs");
        assert_eq!(fx.read_all(keyed.code(), &FetchOptions::default()), b"slashes");
    }

    #[test]
    fn caller_key_is_kept() {
        let fx = Fixture::new().open_default();
        let file = fx
            .router
            .upload(&fx.source("r.TXT", b"readme"), &UploadOptions::default().with_key("readme"))
            .unwrap();
        assert_eq!(file.key(), "readme");
        assert_eq!(file.prefix(), "");
        assert_eq!(file.ext(), "txt");
        assert_eq!(file.file(), "readme.txt");
        assert_eq!(fx.read_all(file.code(), &FetchOptions::default()), b"readme");
    }

    #[test]
    fn upload_before_open_fails() {
        let fx = Fixture::new();
        let source = fx.source("a", b"x");
        assert!(matches!(
            fx.router.upload(&source, &UploadOptions::default()),
            Err(RouterError::InvalidConnection(_))
        ));
    }

    #[test]
    fn upload_source_errors() {
        let fx = Fixture::new().open_default();
        let missing = fx.dir.path().join("missing.txt");
        assert!(fx
            .router
            .upload(&missing, &UploadOptions::default())
            .unwrap_err()
            .is_not_found());
        assert!(fx
            .router
            .upload_to("default", &missing, &UploadOptions::default())
            .unwrap_err()
            .is_not_found());
        assert!(fx
            .router
            .upload(fx.dir.path(), &UploadOptions::default())
            .unwrap_err()
            .is_unsupported());
    }

    #[test]
    fn unknown_backend_is_invalid_connection() {
        let fx = Fixture::new().open_default();
        let source = fx.source("a", b"x");
        assert!(matches!(
            fx.router.upload_to("nope", &source, &UploadOptions::default()),
            Err(RouterError::InvalidConnection(ref n)) if n == "nope"
        ));

        let ghost = codec::encode("ghost", "", "k", "", 1);
        assert!(matches!(
            fx.router.fetch(&ghost, &FetchOptions::default()),
            Err(RouterError::InvalidConnection(_))
        ));
        assert!(matches!(
            fx.router.remove(&ghost, &RemoveOptions::default()),
            Err(RouterError::InvalidConnection(_))
        ));
        assert!(matches!(
            fx.router.health("ghost"),
            Err(RouterError::InvalidConnection(_))
        ));
    }

    #[test]
    fn malformed_code_is_invalid_code() {
        let fx = Fixture::new().open_default();
        for code in ["***", "", "YQ"] {
            assert!(matches!(
                fx.router.fetch(code, &FetchOptions::default()),
                Err(RouterError::InvalidCode(_))
            ));
            assert!(matches!(fx.router.decode(code), Err(RouterError::InvalidCode(_))));
        }
    }

    #[test]
    fn no_placeable_backend() {
        let fx = Fixture::new();
        fx.router.register_config("cold", memory(0)).unwrap();
        fx.router.setup().unwrap();
        fx.router.open().unwrap();
        assert!(matches!(
            fx.router.upload(&fx.source("a", b"x"), &UploadOptions::default()),
            Err(RouterError::NoAvailableBackend)
        ));
    }

    #[test]
    fn zero_weight_backend_stays_addressable() {
        let fx = Fixture::new();
        fx.router
            .register_configs([("hot", memory(1)), ("cold", memory(0))])
            .unwrap();
        fx.router.setup().unwrap();
        fx.router.open().unwrap();

        for i in 0..20 {
            let source = fx.source(&format!("f{i}"), format!("content {i}").as_bytes());
            let file = fx.router.upload(&source, &UploadOptions::default()).unwrap();
            assert_eq!(file.backend(), "hot");
        }

        let source = fx.source("archived", b"archived");
        let file = fx
            .router
            .upload_to("cold", &source, &UploadOptions::default())
            .unwrap();
        assert_eq!(file.backend(), "cold");
        assert_eq!(fx.read_all(file.code(), &FetchOptions::default()), b"archived");
    }

    #[test]
    fn uploads_spread_across_backends() {
        let fx = Fixture::new();
        fx.router
            .register_configs([("default", fx.local("default")), ("mem", memory(1))])
            .unwrap();
        fx.router.setup().unwrap();
        fx.router.open().unwrap();

        let mut seen = BTreeMap::new();
        for i in 0..40 {
            let source = fx.source(&format!("s{i}"), format!("spread {i}").as_bytes());
            let file = fx.router.upload(&source, &UploadOptions::default()).unwrap();
            *seen.entry(file.backend().to_string()).or_insert(0) += 1;
            assert_eq!(
                fx.read_all(file.code(), &FetchOptions::default()),
                format!("spread {i}").as_bytes()
            );
        }
        assert_eq!(seen.len(), 2, "placement used {seen:?}");
    }

    #[test]
    fn custom_placement() {
        let router = Router::new()
            .with_placement(Arc::new(|_: &BTreeMap<String, i64>| Box::new(Always("mem")) as Box<dyn Placement>));
        let fx = Fixture::with_router(router);
        fx.router
            .register_configs([("default", fx.local("default")), ("mem", memory(1))])
            .unwrap();
        fx.router.setup().unwrap();
        fx.router.open().unwrap();
        for i in 0..5 {
            let source = fx.source(&format!("c{i}"), format!("{i}").as_bytes());
            assert_eq!(
                fx.router.upload(&source, &UploadOptions::default()).unwrap().backend(),
                "mem"
            );
        }
    }

    #[test]
    fn browse_local_and_memory() {
        let fx = Fixture::new();
        fx.router
            .register_configs([("default", fx.local("default")), ("mem", memory(0))])
            .unwrap();
        fx.router.setup().unwrap();
        fx.router.open().unwrap();

        let source = fx.source("b.txt", b"browse");
        let local = fx.router.upload_to("default", &source, &UploadOptions::default()).unwrap();
        let path = fx.router.browse(local.code(), &BrowseOptions::default()).unwrap();
        assert_eq!(fs::read(path).unwrap(), b"browse");

        let mem = fx.router.upload_to("mem", &source, &UploadOptions::default()).unwrap();
        assert!(fx
            .router
            .browse(mem.code(), &BrowseOptions::default())
            .unwrap_err()
            .is_unsupported());
    }

    #[test]
    fn download_targets() {
        let fx = Fixture::new();
        fx.router
            .register_configs([("default", fx.local("default")), ("mem", memory(0))])
            .unwrap();
        fx.router.setup().unwrap();
        fx.router.open().unwrap();
        let download_root = fx.router.download_root();
        assert_eq!(download_root, fx.dir.path().join("download"));

        let source = fx.source("d.txt", b"download me");

        // Local returns the stored path; the cache tree is still prepared.
        let local = fx.router.upload_to("default", &source, &UploadOptions::default()).unwrap();
        let stored = fx.router.download(local.code(), &DownloadOptions::default()).unwrap();
        assert_eq!(fs::read(&stored).unwrap(), b"download me");
        assert!(download_root.join("default").join(local.prefix()).is_dir());

        // Memory writes to the computed cache path.
        let mem = fx.router.upload_to("mem", &source, &UploadOptions::default()).unwrap();
        let cached = fx.router.download(mem.code(), &DownloadOptions::default()).unwrap();
        assert_eq!(cached, download_root.join("mem").join(mem.file()));
        assert_eq!(fs::read(&cached).unwrap(), b"download me");

        // An explicit target wins.
        let target = fx.dir.path().join("out/explicit.txt");
        let written = fx.router.download(mem.code(), &DownloadOptions::to(&target)).unwrap();
        assert_eq!(written, target);
        assert_eq!(fs::read(&target).unwrap(), b"download me");
    }

    #[test]
    fn download_refuses_escaping_paths() {
        let fx = Fixture::new();
        fx.router.register_config("mem", memory(1)).unwrap();
        fx.router.setup().unwrap();
        fx.router.open().unwrap();
        let code = codec::encode("mem", "../../etc", "passwd", "", 0);
        let err = fx.router.download(&code, &DownloadOptions::default()).unwrap_err();
        assert!(matches!(err, RouterError::Store(StoreError::InvalidPath(_))));
    }

    #[test]
    fn codes_without_a_file_name_are_refused() {
        let fx = Fixture::new();
        fx.router
            .register_configs([("default", fx.local("default")), ("mem", memory(0))])
            .unwrap();
        fx.router.setup().unwrap();
        fx.router.open().unwrap();

        let local = codec::encode("default", "", "", "", 0);
        assert!(matches!(
            fx.router.fetch(&local, &FetchOptions::default()),
            Err(RouterError::Store(StoreError::InvalidPath(_)))
        ));
        assert!(matches!(
            fx.router.remove(&local, &RemoveOptions::default()),
            Err(RouterError::Store(StoreError::InvalidPath(_)))
        ));

        let mem = codec::encode("mem", "ab", "", "", 0);
        assert!(matches!(
            fx.router.download(&mem, &DownloadOptions::default()),
            Err(RouterError::Store(StoreError::InvalidPath(_)))
        ));
    }

    #[test]
    fn decode_flags_follow_config() {
        let fx = Fixture::new();
        let mut config = fx.local("default");
        config.proxy = true;
        fx.router.register_config("default", config).unwrap();
        fx.router.setup().unwrap();
        fx.router.open().unwrap();

        let file = fx.router.upload(&fx.source("f", b"flags"), &UploadOptions::default()).unwrap();
        assert!(file.proxy());
        assert!(!file.remote());

        assert!(!FileHandle::decode(file.code()).unwrap().proxy());
        let decoded = fx.router.decode(file.code()).unwrap();
        assert!(decoded.proxy());

        let unknown = fx.router.decode(&codec::encode("elsewhere", "", "k", "", 1)).unwrap();
        assert!(!unknown.proxy() && !unknown.remote());
    }

    #[test]
    fn health_reports_every_backend() {
        let fx = Fixture::new();
        fx.router
            .register_configs([("default", fx.local("default")), ("mem", memory(1))])
            .unwrap();
        fx.router.setup().unwrap();
        fx.router.open().unwrap();
        fx.router.upload_to("mem", &fx.source("h", b"h"), &UploadOptions::default()).unwrap();

        let healths = fx.router.healths();
        assert_eq!(healths.len(), 2);
        assert_eq!(healths["mem"].workload, 1);
        assert!(healths["default"].is_idle());
        assert_eq!(fx.router.health("").unwrap(), healths["default"]);
    }

    #[test]
    fn configure_from_host_tree() {
        let dir = tempfile::tempdir().unwrap();
        let router = Router::new();
        let doc = format!(
            r#"
            [file]
            thumb = "thumbs"
            salt = "pepper"

            [storage]
            prefix = "root"
            [storage.setting]
            storage = "{root}"

            [storage.scratch]
            driver = "memory"
            weight = 2.5
            remote = true
            "#,
            root = dir.path().join("store").display()
        );
        let root: toml::Table = doc.parse().unwrap();
        router.configure(&root).unwrap();

        assert_eq!(router.thumbnail_root(), PathBuf::from("thumbs"));
        assert_eq!(router.salt(), "pepper");
        assert_eq!(router.preview_root(), PathBuf::from(crate::config::DEFAULT_PREVIEW_ROOT));

        let backends = router.backends();
        assert_eq!(backends["default"], 1);
        assert_eq!(backends["scratch"], 2);
        assert_eq!(router.backend_config("default").unwrap().prefix, "root");
        assert!(router.backend_config("scratch").unwrap().remote);

        router.setup().unwrap();
        router.open().unwrap();
        assert_eq!(router.healths().len(), 2);
        router.close().unwrap();
    }

    #[test]
    fn configure_merges_over_registered() {
        let router = Router::new();
        router.register_config("mem", memory(4)).unwrap();
        let root: toml::Table = "[storage.mem]\nprefix = \"p\"\n".parse().unwrap();
        router.configure(&root).unwrap();
        let config = router.backend_config("mem").unwrap();
        assert_eq!(config.driver, MEMORY_DRIVER);
        assert_eq!(config.weight, 4);
        assert_eq!(config.prefix, "p");
    }

    #[test]
    fn invalid_configuration_applies_nothing() {
        let router = Router::new();
        let root: toml::Table = "[file]\nsalt = \"s\"\n[storage.a]\nweight = true\n"
            .parse()
            .unwrap();
        assert!(matches!(router.configure(&root), Err(RouterError::Config(_))));
        assert_eq!(router.salt(), crate::config::DEFAULT_SALT);
        assert!(router.backends().is_empty());
    }

    #[test]
    fn concurrent_routing() {
        let fx = Fixture::new();
        fx.router
            .register_configs([("default", fx.local("default")), ("mem", memory(1))])
            .unwrap();
        fx.router.setup().unwrap();
        fx.router.open().unwrap();

        let sources: Vec<(PathBuf, Vec<u8>)> = (0..16)
            .map(|i| {
                let content = format!("concurrent payload {i}").into_bytes();
                (fx.source(&format!("t{i}"), &content), content)
            })
            .collect();

        let router = &fx.router;
        thread::scope(|scope| {
            for (path, content) in &sources {
                scope.spawn(move || {
                    let file = router.upload(path, &UploadOptions::default()).unwrap();
                    let mut out = Vec::new();
                    router
                        .fetch(file.code(), &FetchOptions::default())
                        .unwrap()
                        .read_to_end(&mut out)
                        .unwrap();
                    assert_eq!(&out, content);
                });
            }
        });
    }

    #[test]
    fn router_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Router>();
    }
}
