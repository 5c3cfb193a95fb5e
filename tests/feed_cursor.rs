//! Feed Cursor Integration Tests
//!
//! Parses real RSS documents and checks resumption from every checkpoint
//! position.

use feedscribe::feed::rss::parse_feed;
use feedscribe::feed::{FeedCursor, FeedError};

/// Weekdays of 2024-01-01 onwards
const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// RSS document with `n` items, newest first (`ep-n` .. `ep-1`)
fn rss(n: usize) -> String {
    let items: String = (1..=n)
        .rev()
        .map(|i| {
            format!(
                r#"
    <item>
      <title>Episode {i}: Topic {i}</title>
      <link>https://example.com/episodes/{i}</link>
      <guid isPermaLink="false">ep-{i}</guid>
      <pubDate>{weekday}, {day:02} Jan 2024 12:00:00 +0000</pubDate>
      <description>Show notes {i}</description>
      <category>parenting, movies</category>
      <enclosure url="https://cdn.example.com/ep-{i}.mp3" length="1000" type="audio/mpeg"/>
    </item>"#,
                i = i,
                day = i,
                weekday = WEEKDAYS[(i - 1) % 7]
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Podcast</title>
    <link>https://example.com</link>
    <description>Test</description>{}
  </channel>
</rss>"#,
        items
    )
}

fn guids(cursor: FeedCursor) -> Vec<String> {
    cursor.map(|r| r.unwrap().guid).collect()
}

#[test]
fn test_cold_start_yields_all_in_chronological_order() {
    let entries = parse_feed(rss(4).as_bytes()).unwrap();
    assert_eq!(
        guids(FeedCursor::new(entries, None)),
        vec!["ep-1", "ep-2", "ep-3", "ep-4"]
    );
}

#[test]
fn test_resumes_after_every_checkpoint_position() {
    let n = 5;
    let entries = parse_feed(rss(n).as_bytes()).unwrap();

    for k in 1..=n {
        let checkpoint = format!("ep-{}", k);
        let expected: Vec<String> = (k + 1..=n).map(|i| format!("ep-{}", i)).collect();
        assert_eq!(
            guids(FeedCursor::new(entries.clone(), Some(&checkpoint))),
            expected,
            "checkpoint {}",
            checkpoint
        );
    }
}

#[test]
fn test_checkpoint_missing_from_feed_yields_nothing() {
    let entries = parse_feed(rss(3).as_bytes()).unwrap();
    assert!(guids(FeedCursor::new(entries, Some("ep-999"))).is_empty());
}

#[test]
fn test_episode_fields_from_rss() {
    let entries = parse_feed(rss(1).as_bytes()).unwrap();
    let episode = FeedCursor::new(entries, None).next().unwrap().unwrap();

    assert_eq!(episode.guid, "ep-1");
    assert_eq!(episode.title, "Episode 1: Topic 1");
    assert_eq!(episode.slug, "episode-001-topic-1");
    assert_eq!(episode.link, "https://example.com/episodes/1");
    assert_eq!(episode.audio_url, "https://cdn.example.com/ep-1.mp3");
    assert_eq!(episode.keywords, vec!["parenting", "movies"]);
    assert_eq!(episode.summary, "Show notes 1");
    assert_eq!(episode.duration, "00:00:00");
    assert_eq!(episode.pub_date.to_rfc3339(), "2024-01-01T12:00:00+00:00");
}

#[test]
fn test_item_without_guid_aborts_traversal() {
    let doc = rss(2).replace(r#"<guid isPermaLink="false">ep-2</guid>"#, "");
    let entries = parse_feed(doc.as_bytes()).unwrap();

    let mut cursor = FeedCursor::new(entries, None);
    assert_eq!(cursor.next().unwrap().unwrap().guid, "ep-1");
    assert!(matches!(
        cursor.next(),
        Some(Err(FeedError::MissingField { field: "guid", .. }))
    ));
    assert!(cursor.next().is_none());
}

#[test]
fn test_truncated_feed_is_an_error() {
    let doc = rss(3);
    let truncated = &doc[..doc.len() / 2];
    assert!(matches!(
        parse_feed(truncated.as_bytes()),
        Err(FeedError::Parse(_))
    ));
}
