//! The fixed adaptive-bitrate ladder.

use crate::probe::Orientation;

/// One quality level of the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenditionSpec {
    pub name: &'static str,
    /// Encoded frame for landscape sources (width, height).
    pub landscape: (u32, u32),
    /// Encoded frame for portrait sources (width, height).
    pub portrait: (u32, u32),
    pub crf: u32,
    pub audio_bitrate: &'static str,
    /// Advertised in the master playlist.
    pub bandwidth: u64,
}

/// Highest to lowest; the first entry is the primary rendition the initial
/// pass produces before the HTTP response returns.
pub const LADDER: [RenditionSpec; 4] = [
    RenditionSpec {
        name: "1080p",
        landscape: (1920, 1080),
        portrait: (1080, 1920),
        crf: 20,
        audio_bitrate: "128k",
        bandwidth: 2_500_000,
    },
    RenditionSpec {
        name: "720p",
        landscape: (1280, 720),
        portrait: (720, 1280),
        crf: 22,
        audio_bitrate: "128k",
        bandwidth: 1_300_000,
    },
    RenditionSpec {
        name: "480p",
        landscape: (854, 480),
        portrait: (480, 854),
        crf: 24,
        audio_bitrate: "96k",
        bandwidth: 700_000,
    },
    RenditionSpec {
        name: "360p",
        landscape: (640, 360),
        portrait: (360, 640),
        crf: 26,
        audio_bitrate: "64k",
        bandwidth: 400_000,
    },
];

impl RenditionSpec {
    /// The primary rendition produced before the response returns.
    #[must_use]
    pub fn primary() -> &'static RenditionSpec {
        &LADDER[0]
    }

    /// The renditions finished in the background phase.
    #[must_use]
    pub fn remaining() -> &'static [RenditionSpec] {
        &LADDER[1..]
    }

    #[must_use]
    pub fn frame(&self, orientation: Orientation) -> (u32, u32) {
        match orientation {
            Orientation::Landscape => self.landscape,
            Orientation::Portrait => self.portrait,
        }
    }

    /// `<prefix>_<name>.m3u8`
    #[must_use]
    pub fn playlist_name(&self, prefix: &str) -> String {
        format!("{prefix}_{}.m3u8", self.name)
    }

    /// printf-style segment template: `<prefix>_<name>_%03d.ts`
    #[must_use]
    pub fn segment_template(&self, prefix: &str) -> String {
        format!("{prefix}_{}_%03d.ts", self.name)
    }

    /// Glob matching this rendition's segments: `<prefix>_<name>_*.ts`
    #[must_use]
    pub fn segment_glob(&self, prefix: &str) -> String {
        format!("{prefix}_{}_*.ts", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ladder_is_highest_first() {
        let bandwidths: Vec<u64> = LADDER.iter().map(|r| r.bandwidth).collect();
        let mut sorted = bandwidths.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(bandwidths, sorted);
        assert_eq!(RenditionSpec::primary().name, "1080p");
        assert_eq!(RenditionSpec::remaining().len(), 3);
    }

    #[test]
    fn test_portrait_frames_swap_axes() {
        for spec in &LADDER {
            let (lw, lh) = spec.frame(Orientation::Landscape);
            let (pw, ph) = spec.frame(Orientation::Portrait);
            assert_eq!((lw, lh), (ph, pw));
            assert!(lw > lh);
            assert!(ph > pw);
        }
    }

    #[test]
    fn test_artifact_names() {
        let spec = RenditionSpec::primary();
        assert_eq!(spec.playlist_name("sk_u1"), "sk_u1_1080p.m3u8");
        assert_eq!(spec.segment_template("sk_u1"), "sk_u1_1080p_%03d.ts");
        assert_eq!(spec.segment_glob("sk_u1"), "sk_u1_1080p_*.ts");
    }

    #[test]
    fn test_crf_ladder() {
        let crfs: Vec<u32> = LADDER.iter().map(|r| r.crf).collect();
        assert_eq!(crfs, vec![20, 22, 24, 26]);
    }
}
