//! End-to-end test of a playlist provider backed by local files
//!
//! Uses a real M3U file on disk and a sidecar XMLTV guide, exercising the
//! loader without any network: category synthesis from group titles, item
//! listing, stream resolution, and guide matching through tvg-id aliases.

use std::time::Duration;

use tempfile::TempDir;
use tokio::time::timeout;

use telly::config::AppConfig;
use telly::epg::GuideSource;
use telly::loader::{ContentLoader, LoaderEvent};
use telly::models::{Category, ContentKind, Provider};

const PLAYLIST: &str = r#"#EXTM3U
#EXTINF:-1 tvg-id="news.example" group-title="News",News Channel
http://streams.example/news.ts
#EXTINF:-1 group-title="Sports",Sports One
http://streams.example/sports.ts
#EXTINF:-1 group-title="News",News Two
http://streams.example/news2.ts
"#;

const GUIDE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tv>
  <channel id="news.example">
    <display-name>News Channel</display-name>
  </channel>
  <programme start="20200101000000 +0000" stop="20501231235959 +0000" channel="news.example">
    <title>Rolling Coverage</title>
  </programme>
</tv>"#;

fn write_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn playlist_loader(dir: &TempDir) -> ContentLoader {
    let playlist_path = write_file(dir, "channels.m3u", PLAYLIST);
    let mut config = AppConfig::default();
    config.cache.dir = dir.path().join("cache");
    let provider = Provider::playlist("Local", playlist_path.to_string_lossy());
    ContentLoader::new(provider, &config).unwrap()
}

#[tokio::test]
async fn categories_come_from_group_titles() {
    let dir = TempDir::new().unwrap();
    let mut loader = playlist_loader(&dir);

    loader.request_categories(ContentKind::Live);
    match loader.next_event().await {
        LoaderEvent::Categories { categories, .. } => {
            let names: Vec<&str> = categories.iter().map(|c| c.name.as_str()).collect();
            assert_eq!(names, vec!["All", "News", "Sports"]);
        }
        other => panic!("expected categories, got {other:?}"),
    }

    // Movie and series trees are empty for playlists
    loader.request_categories(ContentKind::Movie);
    match loader.next_event().await {
        LoaderEvent::Categories { categories, .. } => assert!(categories.is_empty()),
        other => panic!("expected categories, got {other:?}"),
    }
}

#[tokio::test]
async fn listing_filters_by_category_and_resolves_streams() {
    let dir = TempDir::new().unwrap();
    let mut loader = playlist_loader(&dir);

    loader.request_categories(ContentKind::Live);
    let categories = match loader.next_event().await {
        LoaderEvent::Categories { categories, .. } => categories,
        other => panic!("expected categories, got {other:?}"),
    };
    let news = categories.iter().find(|c| c.name == "News").unwrap();

    loader.request_listing(news);
    let items = match loader.next_event().await {
        LoaderEvent::Listing { items, complete, .. } => {
            assert!(complete);
            items
        }
        other => panic!("expected listing, got {other:?}"),
    };
    let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["News Channel", "News Two"]);

    let url = loader.resolve_stream(&items[0]).await.unwrap();
    assert_eq!(url, "http://streams.example/news.ts");

    // The All pseudo-category returns everything
    loader.request_listing(&Category::all(ContentKind::Live));
    match loader.next_event().await {
        LoaderEvent::Listing { items, .. } => assert_eq!(items.len(), 3),
        other => panic!("expected listing, got {other:?}"),
    }
}

#[tokio::test]
async fn guide_from_sidecar_file_matches_by_tvg_id() {
    let dir = TempDir::new().unwrap();
    let guide_path = write_file(&dir, "guide.xml", GUIDE);
    let mut loader = playlist_loader(&dir);
    loader.set_guide_source(Some(GuideSource::File(guide_path)));

    assert!(loader.guide_is_stale());
    loader.request_guide(false);
    match timeout(Duration::from_secs(5), loader.next_event())
        .await
        .expect("guide refresh timed out")
    {
        LoaderEvent::GuideUpdated { channels } => assert_eq!(channels, 1),
        other => panic!("expected guide update, got {other:?}"),
    }
    assert!(!loader.guide_is_stale());

    loader.request_listing(&Category::all(ContentKind::Live));
    let items = match loader.next_event().await {
        LoaderEvent::Listing { items, .. } => items,
        other => panic!("expected listing, got {other:?}"),
    };

    let news = items.iter().find(|i| i.name == "News Channel").unwrap();
    let programmes = loader.programmes_for(news, 5);
    assert_eq!(programmes.len(), 1);
    assert_eq!(programmes[0].title, "Rolling Coverage");

    // A channel without guide aliases gets an empty listing
    let sports = items.iter().find(|i| i.name == "Sports One").unwrap();
    assert!(loader.programmes_for(sports, 5).is_empty());

    // A fresh guide is not refetched
    loader.request_guide(false);
    assert!(timeout(Duration::from_millis(100), loader.next_event())
        .await
        .is_err());
}
