//! Output size arithmetic: resolution classes, clamping and alignment.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::request::ResolutionClass;

/// Picture size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Taller than wide. Square pictures count as portrait.
    pub fn is_portrait(self) -> bool {
        self.width <= self.height
    }

    pub fn long_edge(self) -> u32 {
        self.width.max(self.height)
    }

    pub fn short_edge(self) -> u32 {
        self.width.min(self.height)
    }

    pub fn swapped(self) -> Self {
        Self::new(self.height, self.width)
    }

    /// Rounds both edges down to the nearest even value.
    pub fn round_down_even(self) -> Self {
        Self::new(self.width & !1, self.height & !1)
    }

    /// Puts a landscape size into the same orientation as `self`.
    pub fn orient(self, landscape: Dimensions) -> Dimensions {
        let landscape = if landscape.width >= landscape.height {
            landscape
        } else {
            landscape.swapped()
        };
        if self.is_portrait() {
            landscape.swapped()
        } else {
            landscape
        }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Resolves the encoder output size for an input picture.
///
/// With a resolution class the class size is used, in landscape when the
/// input is wider than tall and in portrait otherwise. Without one (or with
/// `Custom`) the explicit size is used, rounded down to even edges.
pub fn resolve_output_dimensions(
    input: Dimensions,
    class: Option<ResolutionClass>,
    explicit: Dimensions,
) -> Dimensions {
    match class.and_then(ResolutionClass::landscape_size) {
        Some((width, height)) => input.orient(Dimensions::new(width, height)),
        None => explicit.round_down_even(),
    }
}

/// Scales `dims` down so its long edge is at most `long_max` and its short
/// edge at most `short_max`, keeping the aspect ratio and even edges.
///
/// Sizes already inside the bounds are returned unchanged.
pub fn clamp_to_bounds(dims: Dimensions, long_max: u32, short_max: u32) -> Dimensions {
    let long = u64::from(dims.long_edge());
    let short = u64::from(dims.short_edge());
    let bound_long = u64::from(long_max.max(short_max));
    let bound_short = u64::from(long_max.min(short_max));

    if long <= bound_long && short <= bound_short {
        return dims;
    }
    if long == 0 || short == 0 {
        return Dimensions::new(2, 2);
    }

    // Scale factor num/den is the smaller of the two edge ratios.
    let (num, den) = if bound_long * short <= bound_short * long {
        (bound_long, long)
    } else {
        (bound_short, short)
    };

    let scale = |edge: u32| -> u32 {
        let scaled = (u64::from(edge) * num / den) as u32;
        (scaled & !1).max(2)
    };
    Dimensions::new(scale(dims.width), scale(dims.height))
}

/// Rounds both edges down to a multiple of `alignment`, never below it.
pub fn align_down(dims: Dimensions, alignment: u32) -> Dimensions {
    if alignment <= 1 {
        return dims;
    }
    let align = |edge: u32| (edge / alignment * alignment).max(alignment);
    Dimensions::new(align(dims.width), align(dims.height))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const LANDSCAPE: Dimensions = Dimensions::new(1920, 1080);
    const PORTRAIT: Dimensions = Dimensions::new(1080, 1920);
    const EXPLICIT: Dimensions = Dimensions::new(1280, 720);

    #[test]
    fn test_resolution_classes_follow_input_orientation() {
        let cases = [
            (ResolutionClass::P480, (854, 480)),
            (ResolutionClass::P720, (1280, 720)),
            (ResolutionClass::P1080, (1920, 1080)),
        ];
        for (class, (w, h)) in cases {
            assert_eq!(
                resolve_output_dimensions(LANDSCAPE, Some(class), EXPLICIT),
                Dimensions::new(w, h)
            );
            assert_eq!(
                resolve_output_dimensions(PORTRAIT, Some(class), EXPLICIT),
                Dimensions::new(h, w)
            );
        }
    }

    #[test]
    fn test_square_input_resolves_to_portrait() {
        assert_eq!(
            resolve_output_dimensions(
                Dimensions::new(720, 720),
                Some(ResolutionClass::P720),
                EXPLICIT
            ),
            Dimensions::new(720, 1280)
        );
    }

    #[test]
    fn test_explicit_fallback_rounds_down_to_even() {
        let explicit = Dimensions::new(1281, 721);
        assert_eq!(
            resolve_output_dimensions(LANDSCAPE, None, explicit),
            Dimensions::new(1280, 720)
        );
        assert_eq!(
            resolve_output_dimensions(LANDSCAPE, Some(ResolutionClass::Custom), explicit),
            Dimensions::new(1280, 720)
        );
    }

    #[test]
    fn test_clamp_is_orientation_aware() {
        assert_eq!(
            clamp_to_bounds(Dimensions::new(3840, 2160), 1920, 1080),
            Dimensions::new(1920, 1080)
        );
        assert_eq!(
            clamp_to_bounds(Dimensions::new(2160, 3840), 1920, 1080),
            Dimensions::new(1080, 1920)
        );
        assert_eq!(
            clamp_to_bounds(Dimensions::new(1080, 1920), 1920, 1080),
            Dimensions::new(1080, 1920)
        );
        assert_eq!(
            clamp_to_bounds(Dimensions::new(1920, 1080), 1280, 720),
            Dimensions::new(1280, 720)
        );
    }

    #[test]
    fn test_clamp_limited_by_short_edge() {
        // 4:3 source against a 16:9 box: the short edge binds.
        assert_eq!(
            clamp_to_bounds(Dimensions::new(2880, 2160), 1920, 1080),
            Dimensions::new(1440, 1080)
        );
    }

    #[test]
    fn test_align_down() {
        assert_eq!(
            align_down(Dimensions::new(854, 480), 16),
            Dimensions::new(848, 480)
        );
        assert_eq!(
            align_down(Dimensions::new(10, 1080), 16),
            Dimensions::new(16, 1072)
        );
    }

    proptest! {
        #[test]
        fn prop_resolution_is_pure(
            w in 2u32..8000,
            h in 2u32..8000,
            ew in 2u32..8000,
            eh in 2u32..8000,
            class in prop::option::of(prop::sample::select(vec![
                ResolutionClass::P480,
                ResolutionClass::P720,
                ResolutionClass::P1080,
                ResolutionClass::Custom,
            ])),
        ) {
            let input = Dimensions::new(w, h);
            let explicit = Dimensions::new(ew, eh);
            let first = resolve_output_dimensions(input, class, explicit);
            let second = resolve_output_dimensions(input, class, explicit);
            prop_assert_eq!(first, second);
            prop_assert_eq!(first.width % 2, 0);
            prop_assert_eq!(first.height % 2, 0);
        }

        #[test]
        fn prop_clamp_stays_within_bounds(
            w in 2u32..10_000,
            h in 2u32..10_000,
        ) {
            let dims = Dimensions::new(w, h).round_down_even();
            let clamped = clamp_to_bounds(dims, 1920, 1080);

            prop_assert!(clamped.long_edge() <= 1920);
            prop_assert!(clamped.short_edge() <= 1080);
            prop_assert_eq!(clamped.width % 2, 0);
            prop_assert_eq!(clamped.height % 2, 0);
            prop_assert_eq!(clamped.is_portrait(), dims.is_portrait() || clamped.width == clamped.height);
        }

        #[test]
        fn prop_align_down_is_multiple(w in 1u32..5000, h in 1u32..5000) {
            let aligned = align_down(Dimensions::new(w, h), 16);
            prop_assert_eq!(aligned.width % 16, 0);
            prop_assert_eq!(aligned.height % 16, 0);
            prop_assert!(aligned.width <= w.max(16));
            prop_assert!(aligned.height <= h.max(16));
        }
    }
}
