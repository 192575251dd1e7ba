//! Streaming XMLTV guide parser
//!
//! Extracts only the fields the guide store uses. Malformed programmes are
//! skipped with a log line rather than failing the whole feed; portals ship
//! guides with the occasional broken entry.

use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveDateTime};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Reader;
use std::collections::HashMap;
use tracing::warn;

use crate::errors::{SourceError, SourceResult};

/// One guide programme with resolved timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct Programme {
    pub channel: String,
    pub start: DateTime<FixedOffset>,
    pub stop: DateTime<FixedOffset>,
    pub title: String,
    pub description: Option<String>,
}

/// A channel declaration from the guide header
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuideChannel {
    pub id: String,
    pub display_names: Vec<String>,
    pub icon: Option<String>,
}

/// Everything a parsed guide contains
#[derive(Debug, Clone, Default)]
pub struct GuideFeed {
    pub channels: Vec<GuideChannel>,
    pub programmes: Vec<Programme>,
}

struct RawProgramme {
    channel: String,
    start: String,
    stop: String,
    title: Option<String>,
    description: Option<String>,
}

/// Parse an XMLTV document
pub fn parse_guide(content: &str) -> SourceResult<GuideFeed> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut feed = GuideFeed::default();
    let mut skipped = 0usize;

    let mut current_programme: Option<RawProgramme> = None;
    let mut current_channel: Option<GuideChannel> = None;
    let mut current_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = element_name(e.name())?;
                match name.as_str() {
                    "programme" => {
                        let attrs = parse_attributes(e);
                        current_programme = Some(RawProgramme {
                            channel: attrs.get("channel").cloned().unwrap_or_default(),
                            start: attrs.get("start").cloned().unwrap_or_default(),
                            stop: attrs.get("stop").cloned().unwrap_or_default(),
                            title: None,
                            description: None,
                        });
                    }
                    "channel" => {
                        let attrs = parse_attributes(e);
                        current_channel = Some(GuideChannel {
                            id: attrs.get("id").cloned().unwrap_or_default(),
                            ..GuideChannel::default()
                        });
                    }
                    "icon" => {
                        if let Some(ref mut channel) = current_channel {
                            let attrs = parse_attributes(e);
                            if let Some(src) = attrs.get("src") {
                                channel.icon = Some(src.clone());
                            }
                        }
                    }
                    _ => {}
                }
                current_text.clear();
            }

            Ok(Event::End(ref e)) => {
                let name = element_name(e.name())?;
                match name.as_str() {
                    "title" => {
                        if let Some(ref mut programme) = current_programme {
                            if !current_text.trim().is_empty() {
                                programme.title = Some(current_text.trim().to_string());
                            }
                        }
                    }
                    "desc" => {
                        if let Some(ref mut programme) = current_programme {
                            if !current_text.trim().is_empty() {
                                programme.description = Some(current_text.trim().to_string());
                            }
                        }
                    }
                    "display-name" => {
                        if let Some(ref mut channel) = current_channel {
                            if !current_text.trim().is_empty() {
                                channel.display_names.push(current_text.trim().to_string());
                            }
                        }
                    }
                    "programme" => {
                        if let Some(raw) = current_programme.take() {
                            match resolve_programme(raw) {
                                Some(programme) => feed.programmes.push(programme),
                                None => skipped += 1,
                            }
                        }
                    }
                    "channel" => {
                        if let Some(channel) = current_channel.take() {
                            if !channel.id.is_empty() {
                                feed.channels.push(channel);
                            }
                        }
                    }
                    _ => {}
                }
                current_text.clear();
            }

            Ok(Event::Empty(ref e)) => {
                let name = element_name(e.name())?;
                if name.as_str() == "icon" {
                    if let Some(ref mut channel) = current_channel {
                        let attrs = parse_attributes(e);
                        if let Some(src) = attrs.get("src") {
                            channel.icon = Some(src.clone());
                        }
                    }
                }
            }

            Ok(Event::Text(e)) => {
                let text = std::str::from_utf8(&e)
                    .map_err(|e| SourceError::malformed(format!("invalid UTF-8 in text: {e}")))?;
                current_text.push_str(text);
            }

            Ok(Event::CData(e)) => {
                let text = std::str::from_utf8(&e)
                    .map_err(|e| SourceError::malformed(format!("invalid UTF-8 in CDATA: {e}")))?;
                current_text.push_str(text);
            }

            Ok(Event::Eof) => break,

            Err(e) => {
                return Err(SourceError::malformed(format!("XML parsing error: {e}")));
            }

            _ => {}
        }
    }

    if skipped > 0 {
        warn!("skipped {skipped} malformed guide programmes");
    }
    Ok(feed)
}

fn resolve_programme(raw: RawProgramme) -> Option<Programme> {
    if raw.channel.is_empty() {
        return None;
    }
    let title = raw.title?;
    let start = match parse_xmltv_timestamp(&raw.start) {
        Some(start) => start,
        None => {
            warn!("unparseable programme start '{}' on {}", raw.start, raw.channel);
            return None;
        }
    };
    let mut stop = match parse_xmltv_timestamp(&raw.stop) {
        Some(stop) => stop,
        None => {
            warn!("unparseable programme stop '{}' on {}", raw.stop, raw.channel);
            return None;
        }
    };
    // Some feeds write midnight-crossing programmes with stop before start
    if stop < start {
        stop = stop.checked_add_days(Days::new(1))?;
    }
    Some(Programme {
        channel: raw.channel,
        start,
        stop,
        title,
        description: raw.description,
    })
}

/// Parse an XMLTV timestamp, assuming UTC when no zone offset is present
pub fn parse_xmltv_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_str(value, "%Y%m%d%H%M%S %z") {
        return Some(parsed);
    }
    for format in ["%Y%m%d%H%M%S", "%Y%m%d%H%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.and_utc().fixed_offset());
        }
    }
    if let Ok(parsed) = NaiveDate::parse_from_str(value, "%Y%m%d") {
        return Some(parsed.and_hms_opt(0, 0, 0)?.and_utc().fixed_offset());
    }
    None
}

/// Shared between start and end tags, which carry different event types
fn element_name(name: QName<'_>) -> SourceResult<String> {
    std::str::from_utf8(name.as_ref())
        .map(|name| name.to_string())
        .map_err(|e| SourceError::malformed(format!("invalid UTF-8 in XML element name: {e}")))
}

fn parse_attributes(element: &BytesStart) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    for attr in element.attributes().flatten() {
        if let (Ok(key), Ok(value)) = (
            std::str::from_utf8(attr.key.as_ref()),
            std::str::from_utf8(&attr.value),
        ) {
            attrs.insert(key.to_string(), value.to_string());
        }
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};
    use rstest::rstest;

    const GUIDE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tv generator-info-name="test">
  <channel id="bbc.one.uk">
    <display-name>BBC One</display-name>
    <display-name>BBC1</display-name>
    <icon src="http://logos.example/bbc1.png"/>
  </channel>
  <programme start="20250601180000 +0100" stop="20250601190000 +0100" channel="bbc.one.uk">
    <title>Evening News</title>
    <desc>Headlines and weather.</desc>
  </programme>
  <programme start="20250601230000 +0100" stop="20250601003000 +0100" channel="bbc.one.uk">
    <title>Late Film</title>
  </programme>
  <programme start="garbage" stop="20250601190000" channel="bbc.one.uk">
    <title>Broken</title>
  </programme>
</tv>"#;

    #[test]
    fn parses_channels_with_aliases_and_icon() {
        let feed = parse_guide(GUIDE).unwrap();
        assert_eq!(feed.channels.len(), 1);
        let channel = &feed.channels[0];
        assert_eq!(channel.id, "bbc.one.uk");
        assert_eq!(channel.display_names, vec!["BBC One", "BBC1"]);
        assert_eq!(channel.icon.as_deref(), Some("http://logos.example/bbc1.png"));
    }

    #[test]
    fn skips_malformed_programmes_without_failing() {
        let feed = parse_guide(GUIDE).unwrap();
        assert_eq!(feed.programmes.len(), 2);
        assert_eq!(feed.programmes[0].title, "Evening News");
        assert_eq!(
            feed.programmes[0].description.as_deref(),
            Some("Headlines and weather.")
        );
    }

    #[test]
    fn text_fields_are_captured_at_closing_tags() {
        let feed = parse_guide(
            "<tv><programme start=\"20250601180000\" stop=\"20250601190000\" channel=\"c1\">\
             <title>Show</title><desc>About</desc></programme></tv>",
        )
        .unwrap();
        assert_eq!(feed.programmes.len(), 1);
        assert_eq!(feed.programmes[0].title, "Show");
        assert_eq!(feed.programmes[0].description.as_deref(), Some("About"));
    }

    #[test]
    fn stop_before_start_rolls_to_next_day() {
        let feed = parse_guide(GUIDE).unwrap();
        let late = &feed.programmes[1];
        assert!(late.stop > late.start);
        assert_eq!(late.stop.date_naive().day(), 2);
    }

    #[test]
    fn timestamp_without_zone_is_utc() {
        let parsed = parse_xmltv_timestamp("20250601180000").unwrap();
        let expected = chrono::Utc
            .with_ymd_and_hms(2025, 6, 1, 18, 0, 0)
            .unwrap()
            .fixed_offset();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn timestamp_with_offset_keeps_offset() {
        let parsed = parse_xmltv_timestamp("20250601180000 +0200").unwrap();
        assert_eq!(parsed.offset().local_minus_utc(), 2 * 3600);
    }

    #[test]
    fn date_only_timestamp_is_midnight() {
        let parsed = parse_xmltv_timestamp("20250601").unwrap();
        assert_eq!(parsed.time(), chrono::NaiveTime::MIN);
    }

    #[rstest]
    #[case("20250601180000 +0100")]
    #[case("20250601180000")]
    #[case("202506011800")]
    #[case("20250601")]
    #[case(" 20250601180000 ")]
    fn accepted_timestamp_formats(#[case] value: &str) {
        assert!(parse_xmltv_timestamp(value).is_some());
    }

    #[rstest]
    #[case("")]
    #[case("garbage")]
    #[case("2025-06-01 18:00")]
    fn rejected_timestamp_formats(#[case] value: &str) {
        assert!(parse_xmltv_timestamp(value).is_none());
    }
}
