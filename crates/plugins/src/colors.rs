//! Color naming helpers for the dominant color plugin

/// Reference palette for nearest-name lookup.
const NAMED_COLORS: &[(&str, (u8, u8, u8))] = &[
    ("black", (0, 0, 0)),
    ("white", (255, 255, 255)),
    ("gray", (128, 128, 128)),
    ("silver", (192, 192, 192)),
    ("red", (220, 20, 60)),
    ("dark red", (139, 0, 0)),
    ("orange", (255, 140, 0)),
    ("brown", (139, 69, 19)),
    ("tan", (210, 180, 140)),
    ("yellow", (255, 215, 0)),
    ("olive", (128, 128, 0)),
    ("green", (34, 139, 34)),
    ("dark green", (0, 100, 0)),
    ("teal", (0, 128, 128)),
    ("cyan", (0, 206, 209)),
    ("blue", (30, 100, 220)),
    ("navy", (0, 0, 128)),
    ("sky blue", (135, 206, 235)),
    ("purple", (128, 0, 128)),
    ("magenta", (255, 0, 255)),
    ("pink", (255, 150, 180)),
    ("beige", (245, 245, 220)),
];

/// Nearest palette name by Euclidean distance in RGB space.
pub fn color_name(rgb: (u8, u8, u8)) -> &'static str {
    NAMED_COLORS
        .iter()
        .min_by_key(|(_, reference)| distance_sq(rgb, *reference))
        .map(|(name, _)| *name)
        .unwrap_or("unknown")
}

pub fn rgb_to_hex(rgb: (u8, u8, u8)) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb.0, rgb.1, rgb.2)
}

fn distance_sq(a: (u8, u8, u8), b: (u8, u8, u8)) -> u32 {
    let dr = a.0 as i32 - b.0 as i32;
    let dg = a.1 as i32 - b.1 as i32;
    let db = a.2 as i32 - b.2 as i32;
    (dr * dr + dg * dg + db * db) as u32
}

/// RGB (0-255) to HSV with saturation and value in [0, 1].
pub fn rgb_to_hsv(rgb: (u8, u8, u8)) -> (f64, f64, f64) {
    let r = rgb.0 as f64 / 255.0;
    let g = rgb.1 as f64 / 255.0;
    let b = rgb.2 as f64 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };

    let saturation = if max == 0.0 { 0.0 } else { delta / max };
    (hue, saturation, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_matches() {
        assert_eq!(color_name((0, 0, 0)), "black");
        assert_eq!(color_name((255, 255, 255)), "white");
    }

    #[test]
    fn test_nearest_match() {
        assert_eq!(color_name((250, 250, 250)), "white");
        assert_eq!(color_name((200, 30, 50)), "red");
    }

    #[test]
    fn test_hex() {
        assert_eq!(rgb_to_hex((255, 0, 16)), "#ff0010");
    }

    #[test]
    fn test_hsv_primaries() {
        let (h, s, v) = rgb_to_hsv((255, 0, 0));
        assert_eq!(h, 0.0);
        assert_eq!(s, 1.0);
        assert_eq!(v, 1.0);

        let (h, _, _) = rgb_to_hsv((0, 255, 0));
        assert!((h - 120.0).abs() < 1e-9);
    }
}
