//! Master playlist generation.
//!
//! Pure text building: the caller decides which renditions to advertise and
//! where their variant playlists live; nothing here touches disk or network.

use crate::probe::Orientation;
use crate::rendition::RenditionSpec;

/// Render the master playlist advertising `specs`, highest bandwidth first.
///
/// `public_base` is the CDN directory of the upload without a trailing
/// slash; variant URLs come out absolute:
/// `<public_base>/<prefix>_<rendition>.m3u8`.
#[must_use]
pub fn build_master_playlist(
    specs: &[RenditionSpec],
    orientation: Orientation,
    public_base: &str,
    prefix: &str,
) -> String {
    let mut ordered: Vec<&RenditionSpec> = specs.iter().collect();
    ordered.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));

    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for spec in ordered {
        let (width, height) = spec.frame(orientation);
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={width}x{height}\n",
            spec.bandwidth
        ));
        out.push_str(&format!("{public_base}/{}\n", spec.playlist_name(prefix)));
    }
    out
}

/// `<prefix>_master.m3u8`
#[must_use]
pub fn master_playlist_name(prefix: &str) -> String {
    format!("{prefix}_master.m3u8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendition::LADDER;

    const BASE: &str = "https://cdn.example.com/clips/sk_A/u1";

    #[test]
    fn test_single_entry_master() {
        let master = build_master_playlist(
            &LADDER[..1],
            Orientation::Landscape,
            BASE,
            "sk_A_u1",
        );
        assert_eq!(
            master,
            "#EXTM3U\n#EXT-X-VERSION:3\n\
             #EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1920x1080\n\
             https://cdn.example.com/clips/sk_A/u1/sk_A_u1_1080p.m3u8\n"
        );
    }

    #[test]
    fn test_full_ladder_ordering_and_bandwidths() {
        let master = build_master_playlist(&LADDER, Orientation::Landscape, BASE, "sk_A_u1");
        let lines: Vec<&str> = master.lines().collect();
        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "#EXT-X-VERSION:3");

        let bandwidths: Vec<&str> = lines
            .iter()
            .filter(|l| l.starts_with("#EXT-X-STREAM-INF"))
            .map(|l| l.split("BANDWIDTH=").nth(1).unwrap().split(',').next().unwrap())
            .collect();
        assert_eq!(bandwidths, vec!["2500000", "1300000", "700000", "400000"]);

        assert!(master.contains("RESOLUTION=1920x1080"));
        assert!(master.contains("RESOLUTION=1280x720"));
        assert!(master.contains("RESOLUTION=854x480"));
        assert!(master.contains("RESOLUTION=640x360"));
    }

    #[test]
    fn test_portrait_resolutions() {
        let master = build_master_playlist(&LADDER, Orientation::Portrait, BASE, "sk_A_u1");
        assert!(master.contains("RESOLUTION=1080x1920"));
        assert!(master.contains("RESOLUTION=720x1280"));
        assert!(master.contains("RESOLUTION=480x854"));
        assert!(master.contains("RESOLUTION=360x640"));
    }

    #[test]
    fn test_unsorted_input_still_emits_highest_first() {
        let reversed: Vec<RenditionSpec> = LADDER.iter().rev().copied().collect();
        let master = build_master_playlist(&reversed, Orientation::Landscape, BASE, "p");
        let first_inf = master.lines().find(|l| l.starts_with("#EXT-X-STREAM-INF")).unwrap();
        assert!(first_inf.contains("BANDWIDTH=2500000"));
    }

    #[test]
    fn test_master_name() {
        assert_eq!(master_playlist_name("sk_A_u1"), "sk_A_u1_master.m3u8");
    }
}
