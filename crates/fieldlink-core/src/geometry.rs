//! Geometry classification for legacy untyped collections.
//!
//! Older payloads put routes and zones in one list; the WKT keyword is the
//! only thing that tells them apart.

use crate::model::GeometryKind;

/// Classify a geometry string as a route or a zone.
///
/// Recognizes WKT (`LINESTRING`, `MULTILINESTRING`, `POLYGON`,
/// `MULTIPOLYGON`, case-insensitive, optionally prefixed by `SRID=n;`) and
/// GeoJSON geometry objects with the matching `type`.
pub fn classify_wkt(geometry: &str) -> Option<GeometryKind> {
    let text = geometry.trim();
    if text.starts_with('{') {
        return classify_geojson(text);
    }
    let text = match text.split_once(';') {
        Some((prefix, rest)) if prefix.trim().to_ascii_uppercase().starts_with("SRID=") => {
            rest.trim_start()
        }
        _ => text,
    };
    let keyword: String = text
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();
    kind_for_keyword(&keyword)
}

fn classify_geojson(text: &str) -> Option<GeometryKind> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let ty = value.get("type")?.as_str()?.to_ascii_uppercase();
    kind_for_keyword(&ty)
}

fn kind_for_keyword(keyword: &str) -> Option<GeometryKind> {
    match keyword {
        "LINESTRING" | "MULTILINESTRING" => Some(GeometryKind::Route),
        "POLYGON" | "MULTIPOLYGON" => Some(GeometryKind::Zone),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_wkt_keywords() {
        assert_eq!(classify_wkt("LINESTRING(0 0, 1 1)"), Some(GeometryKind::Route));
        assert_eq!(classify_wkt("  polygon ((0 0, 1 0, 1 1, 0 0))"), Some(GeometryKind::Zone));
        assert_eq!(
            classify_wkt("MULTILINESTRING((0 0, 1 1))"),
            Some(GeometryKind::Route)
        );
        assert_eq!(classify_wkt("MultiPolygon(((0 0)))"), Some(GeometryKind::Zone));
    }

    #[test]
    fn test_classify_with_srid_prefix() {
        assert_eq!(
            classify_wkt("SRID=4326;LINESTRING(2.3 48.8, 2.4 48.9)"),
            Some(GeometryKind::Route)
        );
    }

    #[test]
    fn test_classify_geojson() {
        assert_eq!(
            classify_wkt(r#"{"type":"Polygon","coordinates":[]}"#),
            Some(GeometryKind::Zone)
        );
        assert_eq!(
            classify_wkt(r#"{"type":"LineString","coordinates":[]}"#),
            Some(GeometryKind::Route)
        );
    }

    #[test]
    fn test_unrecognized() {
        assert_eq!(classify_wkt("POINT(0 0)"), None);
        assert_eq!(classify_wkt(""), None);
        assert_eq!(classify_wkt("{not json"), None);
    }
}
