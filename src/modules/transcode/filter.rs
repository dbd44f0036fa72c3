use super::model::Resolution;

/// Output frame used for every DASH representation.
pub const VIDEO_FRAME: Resolution = Resolution::new(1280, 720);
/// Output frame of the preview thumbnail.
pub const THUMBNAIL_FRAME: Resolution = Resolution::new(320, 180);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitKind {
    /// Bars above and below.
    Letterbox,
    /// Bars left and right.
    Pillarbox,
    Exact,
}

/// Where a source frame lands inside the target frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fit {
    pub scaled: Resolution,
    pub pad_x: u32,
    pub pad_y: u32,
    pub kind: FitKind,
}

/// Aspect-preserving scale followed by padding onto a fixed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalePad {
    pub frame: Resolution,
    pub color: String,
}

impl ScalePad {
    pub fn new(frame: Resolution) -> Self {
        Self {
            frame,
            color: "black".to_string(),
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    /// The `-vf` expression handed to ffmpeg.
    ///
    /// Sources wider than the frame are fitted to its width, everything else to
    /// its height; `-2` keeps the source aspect with an even dimension.
    pub fn filter(&self) -> String {
        let Resolution { width, height } = self.frame;
        let divisor = gcd(width, height);
        let ratio = format!("{}/{}", width / divisor, height / divisor);

        format!(
            "scale='if(gt(a,{ratio}),{width},-2)':'if(gt(a,{ratio}),-2,{height})',\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2:{color}",
            color = self.color,
        )
    }

    /// Evaluates the same policy as [`ScalePad::filter`] for a known source size.
    ///
    /// A source with a zero dimension has no aspect ratio and is reported as
    /// filling the frame.
    pub fn fit(&self, source: Resolution) -> Fit {
        let frame = self.frame;
        if source.width == 0 || source.height == 0 {
            return Fit {
                scaled: frame,
                pad_x: 0,
                pad_y: 0,
                kind: FitKind::Exact,
            };
        }

        let (src_w, src_h) = (u64::from(source.width), u64::from(source.height));
        let (dst_w, dst_h) = (u64::from(frame.width), u64::from(frame.height));

        let wider = src_w * dst_h > src_h * dst_w;
        let scaled = if wider {
            Resolution::new(frame.width, rescale_even(dst_w, src_h, src_w))
        } else {
            Resolution::new(rescale_even(dst_h, src_w, src_h), frame.height)
        };

        let pad_x = frame.width.saturating_sub(scaled.width) / 2;
        let pad_y = frame.height.saturating_sub(scaled.height) / 2;
        let kind = if pad_y > 0 {
            FitKind::Letterbox
        } else if pad_x > 0 {
            FitKind::Pillarbox
        } else {
            FitKind::Exact
        };

        Fit {
            scaled,
            pad_x,
            pad_y,
            kind,
        }
    }
}

// a * b / c rounded to the nearest multiple of two, as ffmpeg does for -2
fn rescale_even(a: u64, b: u64, c: u64) -> u32 {
    let denominator = c * 2;
    let halves = (a * b + denominator / 2) / denominator;
    u32::try_from(halves * 2).unwrap_or(u32::MAX)
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_for_720p_frame() {
        assert_eq!(
            ScalePad::new(VIDEO_FRAME).filter(),
            "scale='if(gt(a,16/9),1280,-2)':'if(gt(a,16/9),-2,720)',pad=1280:720:(ow-iw)/2:(oh-ih)/2:black"
        );
    }

    #[test]
    fn test_filter_for_thumbnail_frame() {
        assert_eq!(
            ScalePad::new(THUMBNAIL_FRAME).with_color("white").filter(),
            "scale='if(gt(a,16/9),320,-2)':'if(gt(a,16/9),-2,180)',pad=320:180:(ow-iw)/2:(oh-ih)/2:white"
        );
    }

    #[test]
    fn test_ultrawide_source_is_letterboxed() {
        let fit = ScalePad::new(VIDEO_FRAME).fit(Resolution::new(2560, 1080));
        assert_eq!(fit.kind, FitKind::Letterbox);
        assert_eq!(fit.scaled, Resolution::new(1280, 540));
        assert_eq!((fit.pad_x, fit.pad_y), (0, 90));
    }

    #[test]
    fn test_widescreen_source_fills_frame() {
        let fit = ScalePad::new(VIDEO_FRAME).fit(Resolution::new(1920, 1080));
        assert_eq!(fit.kind, FitKind::Exact);
        assert_eq!(fit.scaled, VIDEO_FRAME);
        assert_eq!((fit.pad_x, fit.pad_y), (0, 0));
    }

    #[test]
    fn test_four_by_three_source_is_pillarboxed() {
        let fit = ScalePad::new(VIDEO_FRAME).fit(Resolution::new(1440, 1080));
        assert_eq!(fit.kind, FitKind::Pillarbox);
        assert_eq!(fit.scaled, Resolution::new(960, 720));
        assert_eq!((fit.pad_x, fit.pad_y), (160, 0));
    }

    #[test]
    fn test_odd_heights_round_to_even() {
        // 1280 * 1080 / 2520 = 548.57, ffmpeg keeps 548
        let fit = ScalePad::new(VIDEO_FRAME).fit(Resolution::new(2520, 1080));
        assert_eq!(fit.scaled.height % 2, 0);
        assert_eq!(fit.scaled.height, 548);
        assert_eq!(fit.pad_y, 86);
    }

    #[test]
    fn test_thumbnail_fit_uses_small_frame() {
        let fit = ScalePad::new(THUMBNAIL_FRAME).fit(Resolution::new(640, 480));
        assert_eq!(fit.kind, FitKind::Pillarbox);
        assert_eq!(fit.scaled, Resolution::new(240, 180));
        assert_eq!(fit.pad_x, 40);
    }

    #[test]
    fn test_zero_sized_source_does_not_divide_by_zero() {
        let pad = ScalePad::new(VIDEO_FRAME);
        for source in [Resolution::new(0, 0), Resolution::new(1920, 0), Resolution::new(0, 1080)] {
            let fit = pad.fit(source);
            assert_eq!(fit.kind, FitKind::Exact);
            assert_eq!(fit.scaled, VIDEO_FRAME);
            assert_eq!((fit.pad_x, fit.pad_y), (0, 0));
        }
    }
}
