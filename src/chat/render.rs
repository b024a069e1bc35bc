/// `[=====>------]` style bar; `ratio` is clamped to `[0, 1]`.
pub fn loading_bar(ratio: f64, width: usize) -> String {
    let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
    let filled = (ratio * width as f64).round() as usize;

    let mut bar = String::with_capacity(width + 2);
    bar.push('[');
    if filled >= width {
        bar.push_str(&"=".repeat(width));
    } else if filled == 0 {
        bar.push_str(&"-".repeat(width));
    } else {
        bar.push_str(&"=".repeat(filled - 1));
        bar.push('>');
        bar.push_str(&"-".repeat(width - filled));
    }
    bar.push(']');
    bar
}

pub fn volume_bar(volume: u16, max_volume: u16) -> String {
    const SEGMENTS: usize = 10;
    let max = max_volume.max(1);
    let filled = (usize::from(volume.min(max)) * SEGMENTS + usize::from(max) / 2) / usize::from(max);
    let icon = match volume {
        0 => "🔇",
        v if v < max / 2 => "🔉",
        _ => "🔊",
    };
    format!(
        "{} {}{} {}%",
        icon,
        "▮".repeat(filled),
        "▯".repeat(SEGMENTS - filled),
        volume
    )
}

/// `h:mm:ss` for an hour or more, `m:ss` otherwise.
pub fn timestamp(ms: u64) -> String {
    let total = ms / 1000;
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_edges() {
        assert_eq!(loading_bar(0.0, 4), "[----]");
        assert_eq!(loading_bar(1.0, 4), "[====]");
        assert_eq!(loading_bar(0.5, 4), "[=>--]");
        assert_eq!(loading_bar(7.0, 3), "[===]");
    }

    #[test]
    fn timestamps() {
        assert_eq!(timestamp(0), "0:00");
        assert_eq!(timestamp(61_000), "1:01");
        assert_eq!(timestamp(3_723_000), "1:02:03");
    }

    #[test]
    fn volume_bar_scales_to_max() {
        assert_eq!(volume_bar(50, 100), "🔊 ▮▮▮▮▮▯▯▯▯▯ 50%");
        assert_eq!(volume_bar(0, 100), "🔇 ▯▯▯▯▯▯▯▯▯▯ 0%");
    }
}
