use crate::types::HandLandmarks;

/// Pixels added on every side of a finger's landmark bounds.
pub const FINGER_PADDING: i64 = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Finger {
    pub name: &'static str,
    pub landmarks: [usize; 4],
}

pub static FINGER_GROUPS: [Finger; 5] = [
    Finger {
        name: "Thumb",
        landmarks: [1, 2, 3, 4],
    },
    Finger {
        name: "Index Finger",
        landmarks: [5, 6, 7, 8],
    },
    Finger {
        name: "Middle Finger",
        landmarks: [9, 10, 11, 12],
    },
    Finger {
        name: "Ring Finger",
        landmarks: [13, 14, 15, 16],
    },
    Finger {
        name: "Pinky Finger",
        landmarks: [17, 18, 19, 20],
    },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Padded bounds of one finger in a `width` x `height` photo. The bounds
/// start from the photo edges, so a finger reported outside the photo still
/// yields a padding-wide strip along the nearest edge. `None` only when the
/// clamped box has no area.
pub fn finger_box(
    hand: &HandLandmarks,
    finger: &Finger,
    width: u32,
    height: u32,
) -> Option<CropBox> {
    let (w, h) = (i64::from(width), i64::from(height));
    let (mut min_x, mut min_y) = (w, h);
    let (mut max_x, mut max_y) = (0, 0);

    for &idx in &finger.landmarks {
        let point = hand.points[idx];
        let x = (point.x * width as f32) as i64;
        let y = (point.y * height as f32) as i64;
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }

    let min_x = (min_x - FINGER_PADDING).max(0);
    let min_y = (min_y - FINGER_PADDING).max(0);
    let max_x = (max_x + FINGER_PADDING).min(w);
    let max_y = (max_y + FINGER_PADDING).min(h);

    if max_x <= min_x || max_y <= min_y {
        return None;
    }

    Some(CropBox {
        x: min_x as u32,
        y: min_y as u32,
        width: (max_x - min_x) as u32,
        height: (max_y - min_y) as u32,
    })
}

pub fn finger_boxes(
    hand: &HandLandmarks,
    width: u32,
    height: u32,
) -> impl Iterator<Item = (&'static Finger, Option<CropBox>)> + '_ {
    FINGER_GROUPS
        .iter()
        .map(move |finger| (finger, finger_box(hand, finger, width, height)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tests::hand_from_fn;

    #[test]
    fn boxes_are_padded_and_truncated() {
        let hand = hand_from_fn(|i| (i as f32 / 32.0, 0.5));
        let index = finger_box(&hand, &FINGER_GROUPS[1], 1024, 800).unwrap();
        // Landmarks 5..=8 sit at x = 160..=256, y = 400.
        assert_eq!(
            index,
            CropBox {
                x: 140,
                y: 380,
                width: 136,
                height: 40,
            }
        );
    }

    #[test]
    fn boxes_clamp_to_photo() {
        let hand = hand_from_fn(|_| (0.999, 0.001));
        let thumb = finger_box(&hand, &FINGER_GROUPS[0], 100, 100).unwrap();
        assert_eq!(thumb.x, 79);
        assert_eq!(thumb.y, 0);
        assert_eq!(thumb.x + thumb.width, 100);
        assert_eq!(thumb.height, 20);
    }

    #[test]
    fn boxes_are_deterministic() {
        let hand = hand_from_fn(|i| ((i as f32 * 0.037).fract(), (i as f32 * 0.053).fract()));
        let first: Vec<_> = finger_boxes(&hand, 640, 480).collect();
        let second: Vec<_> = finger_boxes(&hand, 640, 480).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);
    }

    #[test]
    fn fingers_past_an_edge_keep_an_edge_strip() {
        let strip = CropBox {
            x: 80,
            y: 30,
            width: 20,
            height: 40,
        };
        for x in [1.05, 1.5] {
            let hand = hand_from_fn(|_| (x, 0.5));
            assert_eq!(finger_box(&hand, &FINGER_GROUPS[0], 100, 100), Some(strip));
        }

        let hand = hand_from_fn(|_| (-0.4, 0.5));
        let left = finger_box(&hand, &FINGER_GROUPS[2], 100, 100).unwrap();
        assert_eq!((left.x, left.width), (0, 20));
    }

    #[test]
    fn empty_photo_has_no_box() {
        let hand = hand_from_fn(|_| (0.5, 0.5));
        assert!(finger_box(&hand, &FINGER_GROUPS[1], 0, 0).is_none());
    }

    #[test]
    fn finger_groups_cover_all_but_wrist() {
        let mut covered: Vec<usize> = FINGER_GROUPS
            .iter()
            .flat_map(|f| f.landmarks)
            .collect();
        covered.sort_unstable();
        assert_eq!(covered, (1..=20).collect::<Vec<_>>());
    }
}
