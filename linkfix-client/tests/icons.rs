use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use futures::future::BoxFuture;
use linkfix_client::icons::{
    CatalogKey, DirCatalog, FALLBACK_ICON, Icon, IconCatalog, IconLoadError, IconResolver,
    MemoryCatalog, RenderIcon,
};

const SVG: &str = "<svg/>";

/// Counts loads and fails any key it does not hold.
struct CountingCatalog {
    inner: MemoryCatalog,
    loads: AtomicUsize,
    fail_with: Option<String>,
}

impl CountingCatalog {
    fn new(inner: MemoryCatalog) -> Arc<Self> {
        Arc::new(Self {
            inner,
            loads: AtomicUsize::new(0),
            fail_with: None,
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryCatalog::new(),
            loads: AtomicUsize::new(0),
            fail_with: Some(message.to_owned()),
        })
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl IconCatalog for CountingCatalog {
    fn load(&self, key: &CatalogKey) -> BoxFuture<'static, Result<Icon, IconLoadError>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            let message = message.clone();
            return Box::pin(async move { Err(IconLoadError::Failed(message)) });
        }
        self.inner.load(key)
    }
}

#[tokio::test]
async fn rebranded_alias_shares_the_canonical_icon() {
    let catalog = CountingCatalog::new(MemoryCatalog::new().with_icon("SiX", SVG));
    let resolver = IconResolver::new(catalog.clone());

    let mut twitter = resolver.resolve("twitter");
    let mut x = resolver.resolve("x");

    let (RenderIcon::Icon(a), RenderIcon::Icon(b)) = (twitter.settled().await, x.settled().await)
    else {
        panic!("both identifiers should resolve to an icon");
    };
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.key, CatalogKey::new("SiX"));
    assert_eq!(resolver.cached_len(), 1);
    assert_eq!(catalog.loads(), 1);
}

#[tokio::test]
async fn resolve_returns_a_placeholder_until_the_load_settles() {
    let resolver = IconResolver::new(Arc::new(MemoryCatalog::new().with_icon("SiBluesky", SVG)));

    let mut handle = resolver.resolve("bsky");
    assert_eq!(handle.current(), RenderIcon::Placeholder);

    let settled = handle.settled().await;
    assert_eq!(settled.name(), "SiBluesky");
    assert_eq!(handle.current(), settled);
}

#[tokio::test]
async fn unknown_identifier_uses_the_naming_convention() {
    let resolver = IconResolver::new(Arc::new(MemoryCatalog::new().with_icon("SiMastodon", SVG)));
    let icon = resolver.resolve("Mastodon").settled().await;
    assert_eq!(icon.name(), "SiMastodon");
}

#[tokio::test]
async fn alias_resolution_does_not_depend_on_order() {
    for catalog in [
        MemoryCatalog::new().with_icon("SiTwitter", SVG),
        MemoryCatalog::new().with_icon("SiX", SVG),
    ] {
        let twitter_first = IconResolver::new(Arc::new(catalog.clone()));
        let a_twitter = twitter_first.resolve("twitter").settled().await;
        let a_x = twitter_first.resolve("x").settled().await;

        let x_first = IconResolver::new(Arc::new(catalog));
        let b_x = x_first.resolve("x").settled().await;
        let b_twitter = x_first.resolve("twitter").settled().await;

        assert_eq!(a_twitter, b_twitter);
        assert_eq!(a_x, b_x);
        assert_eq!(a_twitter, a_x);
    }
}

#[tokio::test]
async fn legacy_brand_key_is_not_consulted() {
    let resolver = IconResolver::new(Arc::new(MemoryCatalog::new().with_icon("SiTwitter", SVG)));
    let icon = resolver.resolve("twitter").settled().await;
    assert_eq!(icon, RenderIcon::Fallback);
}

#[tokio::test]
async fn bundled_catalog_covers_the_curated_set() {
    let resolver = IconResolver::new(Arc::new(MemoryCatalog::bundled()));
    assert_eq!(resolver.preload().await, 5);
    assert_eq!(resolver.resolve("twitter").settled().await.name(), "SiX");
}

#[tokio::test]
async fn missing_icon_falls_back_and_is_not_retried() {
    let catalog = CountingCatalog::new(MemoryCatalog::new());
    let resolver = IconResolver::new(catalog.clone());

    assert_eq!(resolver.resolve("reddit").settled().await, RenderIcon::Fallback);
    assert_eq!(resolver.resolve("reddit").settled().await, RenderIcon::Fallback);
    assert_eq!(catalog.loads(), 1);
}

#[tokio::test]
async fn failing_catalog_degrades_to_fallback() {
    let catalog = CountingCatalog::failing("catalog offline");
    let resolver = IconResolver::new(catalog.clone());

    let icon = resolver.resolve("friendica").settled().await;
    assert_eq!(icon, RenderIcon::Fallback);
    assert_eq!(icon.name(), FALLBACK_ICON);
}

#[tokio::test]
async fn empty_identifier_is_fallback_without_a_load() {
    let catalog = CountingCatalog::new(MemoryCatalog::new());
    let resolver = IconResolver::new(catalog.clone());

    let handle = resolver.resolve("   ");
    assert_eq!(handle.current(), RenderIcon::Fallback);
    assert_eq!(catalog.loads(), 0);
}

#[tokio::test]
async fn preload_resolves_the_curated_set() {
    let catalog = MemoryCatalog::new()
        .with_icon("SiX", SVG)
        .with_icon("SiBluesky", SVG);
    let resolver = IconResolver::new(Arc::new(catalog));

    assert_eq!(resolver.preload().await, 2);
    assert_eq!(resolver.cached_len(), 5);
    assert!(matches!(resolver.resolve("x").current(), RenderIcon::Icon(_)));
}

#[tokio::test]
async fn dir_catalog_reads_svg_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("SiTiktok.svg"), SVG).expect("write icon");
    let catalog = DirCatalog::new(dir.path());

    let icon = catalog
        .load(&CatalogKey::new("SiTiktok"))
        .await
        .expect("icon on disk");
    assert_eq!(&*icon.svg, SVG);

    let missing = catalog.load(&CatalogKey::new("SiReddit")).await;
    assert_eq!(
        missing,
        Err(IconLoadError::NotFound(CatalogKey::new("SiReddit")))
    );
}
