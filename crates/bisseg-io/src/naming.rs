//! Output file names that record the segmentation parameters.
//!
//! The threshold, shape and compactness are appended to the input name
//! with their decimal points removed: `image.tif` segmented at threshold
//! 10 with shape 0.5 and compactness 0.5 becomes `image.tif_10_05_05.tif`.
//! Weights are written in their shortest round-trip form with at least
//! one decimal, so `1.0` gives `10` and `0.75` gives `075`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Default output extension.
pub const DEFAULT_EXTENSION: &str = "tif";

/// Default separator between the base name and each parameter.
pub const DEFAULT_SEPARATOR: &str = "_";

fn weight(value: f64) -> String {
    format!("{value:?}").replace('.', "")
}

fn suffix(threshold: u32, shape: f64, compactness: f64, ext: &str, sep: &str) -> String {
    format!(
        "{sep}{threshold}{sep}{}{sep}{}.{ext}",
        weight(shape),
        weight(compactness)
    )
}

/// Name for the output of `base` with the default extension and separator.
#[must_use]
pub fn output_name(base: &str, threshold: u32, shape: f64, compactness: f64) -> String {
    output_name_with(
        base,
        threshold,
        shape,
        compactness,
        DEFAULT_EXTENSION,
        DEFAULT_SEPARATOR,
    )
}

/// Name for the output of `base` with an explicit extension and separator.
#[must_use]
pub fn output_name_with(
    base: &str,
    threshold: u32,
    shape: f64,
    compactness: f64,
    ext: &str,
    sep: &str,
) -> String {
    format!("{base}{}", suffix(threshold, shape, compactness, ext, sep))
}

/// Output path next to `input`, keeping its directory and full file name.
#[must_use]
pub fn output_path(input: &Path, threshold: u32, shape: f64, compactness: f64) -> PathBuf {
    let mut name = OsString::from(input.as_os_str());
    name.push(suffix(
        threshold,
        shape,
        compactness,
        DEFAULT_EXTENSION,
        DEFAULT_SEPARATOR,
    ));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_parameters() {
        assert_eq!(output_name("filename.inp", 5, 0.5, 0.5), "filename.inp_5_05_05.tif");
        assert_eq!(output_name("image.tif", 10, 0.5, 0.5), "image.tif_10_05_05.tif");
    }

    #[test]
    fn weights_drop_the_decimal_point() {
        assert_eq!(
            output_name_with("./test.inp", 100, 0.75, 1.0, "jpg", "_"),
            "./test.inp_100_075_10.jpg"
        );
        assert_eq!(output_name("a", 1, 0.0, 0.1), "a_1_00_01.tif");
    }

    #[test]
    fn directories_are_kept() {
        assert_eq!(
            output_name("/wherethefileis/filename.inp", 5, 0.5, 0.5),
            "/wherethefileis/filename.inp_5_05_05.tif"
        );
        assert_eq!(
            output_path(Path::new("/data/scene.png"), 20, 0.3, 0.9),
            PathBuf::from("/data/scene.png_20_03_09.tif")
        );
    }

    #[test]
    fn custom_separator() {
        assert_eq!(
            output_name_with("x", 7, 0.5, 0.25, "png", "-"),
            "x-7-05-025.png"
        );
    }
}
