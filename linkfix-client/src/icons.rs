use std::{
    collections::HashMap,
    fmt, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::future::{BoxFuture, join_all};
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

/// Name of the generic placeholder glyph used when no brand icon resolves.
pub const FALLBACK_ICON: &str = "HelpCircle";
const CATALOG_PREFIX: &str = "Si";

static BUNDLED_ICONS: [(&str, &str); 5] = [
    ("SiX", include_str!("../assets/icons/SiX.svg")),
    ("SiBluesky", include_str!("../assets/icons/SiBluesky.svg")),
    ("SiTiktok", include_str!("../assets/icons/SiTiktok.svg")),
    ("SiInstagram", include_str!("../assets/icons/SiInstagram.svg")),
    ("SiReddit", include_str!("../assets/icons/SiReddit.svg")),
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CatalogKey(String);

impl CatalogKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// `"bluesky"` -> `"SiBluesky"`.
    pub fn from_convention(identifier: &str) -> Option<Self> {
        let lower = identifier.trim().to_lowercase();
        let mut chars = lower.chars();
        let first = chars.next()?;
        Some(Self(format!(
            "{CATALOG_PREFIX}{}{}",
            first.to_uppercase(),
            chars.as_str()
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CatalogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Brands with a fixed catalog key. Also the eager preload set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrandIcon {
    X,
    Bluesky,
    Tiktok,
    Instagram,
    Reddit,
}

impl BrandIcon {
    pub const ALL: [BrandIcon; 5] = [
        BrandIcon::X,
        BrandIcon::Bluesky,
        BrandIcon::Tiktok,
        BrandIcon::Instagram,
        BrandIcon::Reddit,
    ];

    pub fn from_alias(identifier: &str) -> Option<Self> {
        match identifier.trim().to_ascii_lowercase().as_str() {
            "twitter" | "x" => Some(BrandIcon::X),
            "bluesky" | "bsky" => Some(BrandIcon::Bluesky),
            "tiktok" => Some(BrandIcon::Tiktok),
            "instagram" | "ig" => Some(BrandIcon::Instagram),
            "reddit" => Some(BrandIcon::Reddit),
            _ => None,
        }
    }

    pub fn identifier(self) -> &'static str {
        match self {
            BrandIcon::X => "x",
            BrandIcon::Bluesky => "bluesky",
            BrandIcon::Tiktok => "tiktok",
            BrandIcon::Instagram => "instagram",
            BrandIcon::Reddit => "reddit",
        }
    }

    pub fn catalog_key(self) -> CatalogKey {
        CatalogKey::new(match self {
            BrandIcon::X => "SiX",
            BrandIcon::Bluesky => "SiBluesky",
            BrandIcon::Tiktok => "SiTiktok",
            BrandIcon::Instagram => "SiInstagram",
            BrandIcon::Reddit => "SiReddit",
        })
    }
}

/// An alias hit is final: every alias of a brand maps to the same single key.
pub fn catalog_key_for(identifier: &str) -> Option<CatalogKey> {
    match BrandIcon::from_alias(identifier) {
        Some(brand) => Some(brand.catalog_key()),
        None => CatalogKey::from_convention(identifier),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icon {
    pub key: CatalogKey,
    pub svg: Arc<str>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IconLoadError {
    #[error("icon {0} not found in catalog")]
    NotFound(CatalogKey),
    #[error("icon load failed: {0}")]
    Failed(String),
}

pub trait IconCatalog: Send + Sync + 'static {
    fn load(&self, key: &CatalogKey) -> BoxFuture<'static, Result<Icon, IconLoadError>>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    icons: HashMap<CatalogKey, Arc<str>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in glyphs for every `BrandIcon`.
    pub fn bundled() -> Self {
        let mut catalog = Self::new();
        for (key, svg) in BUNDLED_ICONS {
            catalog.insert(key, svg);
        }
        catalog
    }

    pub fn with_icon(mut self, key: &str, svg: &str) -> Self {
        self.insert(key, svg);
        self
    }

    pub fn insert(&mut self, key: &str, svg: &str) {
        self.icons.insert(CatalogKey::new(key), Arc::from(svg));
    }
}

impl IconCatalog for MemoryCatalog {
    fn load(&self, key: &CatalogKey) -> BoxFuture<'static, Result<Icon, IconLoadError>> {
        let result = self
            .icons
            .get(key)
            .map(|svg| Icon {
                key: key.clone(),
                svg: Arc::clone(svg),
            })
            .ok_or_else(|| IconLoadError::NotFound(key.clone()));
        Box::pin(futures::future::ready(result))
    }
}

/// Reads `<root>/<key>.svg` on demand.
#[derive(Debug, Clone)]
pub struct DirCatalog {
    root: PathBuf,
}

impl DirCatalog {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl IconCatalog for DirCatalog {
    fn load(&self, key: &CatalogKey) -> BoxFuture<'static, Result<Icon, IconLoadError>> {
        let path = self.root.join(format!("{key}.svg"));
        let key = key.clone();
        Box::pin(async move {
            match tokio::fs::read_to_string(&path).await {
                Ok(svg) => Ok(Icon {
                    key,
                    svg: Arc::from(svg),
                }),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    Err(IconLoadError::NotFound(key))
                }
                Err(err) => Err(IconLoadError::Failed(format!("{}: {err}", path.display()))),
            }
        })
    }
}

/// What a view should draw right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderIcon {
    /// Load in flight; occupies the same space as the final icon.
    Placeholder,
    Icon(Arc<Icon>),
    Fallback,
}

impl RenderIcon {
    pub fn is_settled(&self) -> bool {
        !matches!(self, RenderIcon::Placeholder)
    }

    pub fn name(&self) -> &str {
        match self {
            RenderIcon::Icon(icon) => icon.key.as_str(),
            RenderIcon::Placeholder | RenderIcon::Fallback => FALLBACK_ICON,
        }
    }
}

/// A view's reference to a resolving icon. Dropping it discards interest in the load.
#[derive(Debug, Clone)]
pub struct IconHandle {
    rx: watch::Receiver<RenderIcon>,
}

impl IconHandle {
    fn settled_with(icon: RenderIcon) -> Self {
        let (_tx, rx) = watch::channel(icon);
        Self { rx }
    }

    pub fn current(&self) -> RenderIcon {
        self.rx.borrow().clone()
    }

    pub async fn settled(&mut self) -> RenderIcon {
        let settled = match self.rx.wait_for(RenderIcon::is_settled).await {
            Ok(icon) => Some(icon.clone()),
            Err(_) => None,
        };
        // The loader is gone without settling.
        settled.unwrap_or_else(|| match self.current() {
            RenderIcon::Placeholder => RenderIcon::Fallback,
            current => current,
        })
    }
}

struct ResolverShared {
    catalog: Arc<dyn IconCatalog>,
    // Append-only for the resolver's lifetime.
    cache: Mutex<HashMap<CatalogKey, watch::Receiver<RenderIcon>>>,
}

impl ResolverShared {
    fn cache(&self) -> MutexGuard<'_, HashMap<CatalogKey, watch::Receiver<RenderIcon>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct IconResolver {
    shared: Arc<ResolverShared>,
}

impl IconResolver {
    pub fn new(catalog: Arc<dyn IconCatalog>) -> Self {
        Self {
            shared: Arc::new(ResolverShared {
                catalog,
                cache: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns immediately. The first resolve of a key starts its load on the Tokio runtime.
    pub fn resolve(&self, identifier: &str) -> IconHandle {
        let Some(key) = catalog_key_for(identifier) else {
            return IconHandle::settled_with(RenderIcon::Fallback);
        };

        let tx = {
            let mut cache = self.shared.cache();
            if let Some(rx) = cache.get(&key) {
                return IconHandle { rx: rx.clone() };
            }
            let (tx, rx) = watch::channel(RenderIcon::Placeholder);
            cache.insert(key.clone(), rx);
            tx
        };

        let rx = tx.subscribe();
        let catalog = Arc::clone(&self.shared.catalog);
        tokio::spawn(async move {
            let icon = load(catalog.as_ref(), &key).await;
            tx.send_replace(icon);
        });
        IconHandle { rx }
    }

    /// Loads the curated brand set up front. Returns how many resolved to a real icon.
    pub async fn preload(&self) -> usize {
        let mut handles: Vec<IconHandle> = BrandIcon::ALL
            .iter()
            .map(|brand| self.resolve(brand.identifier()))
            .collect();
        let settled = join_all(handles.iter_mut().map(IconHandle::settled)).await;
        settled
            .iter()
            .filter(|icon| matches!(icon, RenderIcon::Icon(_)))
            .count()
    }

    pub fn cached_len(&self) -> usize {
        self.shared.cache().len()
    }
}

async fn load(catalog: &dyn IconCatalog, key: &CatalogKey) -> RenderIcon {
    match catalog.load(key).await {
        Ok(icon) => RenderIcon::Icon(Arc::new(icon)),
        Err(err) => {
            debug!(%key, "icon lookup failed, using fallback: {}", err);
            RenderIcon::Fallback
        }
    }
}
