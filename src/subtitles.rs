use crate::models::SubtitleCue;

/// Offset added to every parsed timecode. Source content is commonly muxed
/// about half a second ahead of player time; results are clamped at zero.
pub const DEFAULT_TIME_OFFSET: f64 = -0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleFormat {
    WebVtt,
    Srt,
}

/// WebVTT when the content leads with the literal header token or the file
/// name says `.vtt`; everything else is treated as SRT.
pub fn detect_format(content: &str, file_name: Option<&str>) -> SubtitleFormat {
    if content.trim_start().starts_with("WEBVTT") {
        return SubtitleFormat::WebVtt;
    }
    if file_name
        .map(|n| n.to_ascii_lowercase().ends_with(".vtt"))
        .unwrap_or(false)
    {
        return SubtitleFormat::WebVtt;
    }
    SubtitleFormat::Srt
}

/// An ordered cue list parsed from one subtitle file. Cue order follows the
/// source, which is assumed to already be chronological.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubtitleTrack {
    pub cues: Vec<SubtitleCue>,
}

impl SubtitleTrack {
    pub fn parse(content: &str, file_name: Option<&str>) -> Self {
        Self::parse_with_offset(content, file_name, DEFAULT_TIME_OFFSET)
    }

    pub fn parse_with_offset(content: &str, file_name: Option<&str>, offset: f64) -> Self {
        let format = detect_format(content, file_name);
        let lines: Vec<&str> = content.lines().collect();
        let mut cues = Vec::new();
        let mut i = 0;

        while i < lines.len() {
            let Some((start_raw, end_raw)) = split_timecode_line(lines[i]) else {
                i += 1;
                continue;
            };
            let (Some(start), Some(end)) = (
                parse_timecode(start_raw, format),
                parse_timecode(end_raw, format),
            ) else {
                i += 1;
                continue;
            };

            // The line right before the timecode, when present, is the cue
            // identifier (SRT counter or named VTT cue).
            let id = preceding_id(&lines, i).unwrap_or_else(|| (cues.len() + 1).to_string());

            let mut text_lines: Vec<&str> = Vec::new();
            i += 1;
            while i < lines.len() && !lines[i].trim().is_empty() {
                text_lines.push(lines[i].trim());
                i += 1;
            }
            let text = text_lines.join("\n");
            if text.trim().is_empty() {
                continue;
            }

            cues.push(SubtitleCue {
                id,
                start_time: (start + offset).max(0.0),
                end_time: (end + offset).max(0.0),
                text,
            });
        }

        Self { cues }
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// The at-most-one cue active at playback position `t`. No active cue is
    /// a normal steady state between lines.
    pub fn cue_at(&self, t: f64) -> Option<&SubtitleCue> {
        self.cues
            .iter()
            .find(|c| c.start_time <= t && t <= c.end_time)
    }
}

fn split_timecode_line(line: &str) -> Option<(&str, &str)> {
    let (start, rest) = line.split_once("-->")?;
    // VTT allows cue settings after the end timecode.
    let end = rest.trim().split_whitespace().next()?;
    Some((start.trim(), end))
}

/// `HH:MM:SS.mmm` for WebVTT, `HH:MM:SS,mmm` for SRT. The hour field may be
/// absent in VTT.
fn parse_timecode(raw: &str, format: SubtitleFormat) -> Option<f64> {
    let sep = match format {
        SubtitleFormat::WebVtt => '.',
        SubtitleFormat::Srt => ',',
    };
    let (clock, millis) = raw.trim().rsplit_once(sep)?;
    let millis: f64 = millis.trim().parse::<u32>().ok()? as f64 / 1000.0;

    let parts: Vec<&str> = clock.split(':').collect();
    let (h, m, s) = match parts.len() {
        3 => (parts[0], parts[1], parts[2]),
        2 => ("0", parts[0], parts[1]),
        _ => return None,
    };
    let h: f64 = h.trim().parse::<u32>().ok()? as f64;
    let m: f64 = m.trim().parse::<u32>().ok()? as f64;
    let s: f64 = s.trim().parse::<u32>().ok()? as f64;
    Some(h * 3600.0 + m * 60.0 + s + millis)
}

fn preceding_id(lines: &[&str], timecode_idx: usize) -> Option<String> {
    if timecode_idx == 0 {
        return None;
    }
    let prev = lines[timecode_idx - 1].trim();
    if prev.is_empty() || prev.contains("-->") || prev.starts_with("WEBVTT") {
        return None;
    }
    Some(prev.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_webvtt_with_default_offset() {
        let track = SubtitleTrack::parse("WEBVTT\n\n00:00:01.000 --> 00:00:03.000\nHello\n", None);
        assert_eq!(track.len(), 1);
        let cue = &track.cues[0];
        assert!((cue.start_time - 0.5).abs() < 1e-9);
        assert!((cue.end_time - 2.5).abs() < 1e-9);
        assert_eq!(cue.text, "Hello");
    }

    #[test]
    fn parses_srt_with_counter_id() {
        let track = SubtitleTrack::parse("1\n00:00:01,000 --> 00:00:03,000\nHi there\n", None);
        assert_eq!(track.len(), 1);
        let cue = &track.cues[0];
        assert_eq!(cue.id, "1");
        assert_eq!(cue.text, "Hi there");
        assert!((cue.start_time - 0.5).abs() < 1e-9);
        assert!((cue.end_time - 2.5).abs() < 1e-9);
    }

    #[test]
    fn vtt_extension_forces_vtt_parsing() {
        let track = SubtitleTrack::parse(
            "00:01.000 --> 00:03.500\nShort clock\n",
            Some("episode-1.vtt"),
        );
        assert_eq!(track.len(), 1);
        assert!((track.cues[0].end_time - 3.0).abs() < 1e-9);
    }

    #[test]
    fn offset_clamps_at_zero() {
        let track = SubtitleTrack::parse("WEBVTT\n\n00:00:00.200 --> 00:00:00.400\nEarly\n", None);
        assert_eq!(track.cues[0].start_time, 0.0);
        assert_eq!(track.cues[0].end_time, 0.0);
    }

    #[test]
    fn drops_cues_with_empty_text() {
        let vtt = "WEBVTT\n\n00:00:01.000 --> 00:00:02.000\n\n00:00:03.000 --> 00:00:04.000\nKept\n";
        let track = SubtitleTrack::parse(vtt, None);
        assert_eq!(track.len(), 1);
        assert_eq!(track.cues[0].text, "Kept");
    }

    #[test]
    fn accumulates_multi_line_text_until_blank() {
        let srt = "1\n00:00:01,000 --> 00:00:03,000\nline one\nline two\n\n2\n00:00:04,000 --> 00:00:05,000\nnext\n";
        let track = SubtitleTrack::parse(srt, None);
        assert_eq!(track.len(), 2);
        assert_eq!(track.cues[0].text, "line one\nline two");
        assert_eq!(track.cues[1].id, "2");
    }

    #[test]
    fn cue_lookup_by_position() {
        let srt = "1\n00:00:01,000 --> 00:00:03,000\na\n\n2\n00:00:10,000 --> 00:00:12,000\nb\n";
        let track = SubtitleTrack::parse(srt, None);
        assert_eq!(track.cue_at(1.0).map(|c| c.text.as_str()), Some("a"));
        assert_eq!(track.cue_at(10.0).map(|c| c.text.as_str()), Some("b"));
        // Gap between lines: no active cue.
        assert!(track.cue_at(5.0).is_none());
    }
}
