// SPDX-License-Identifier: (GPL-2.0 OR GPL-3.0)
// Copyright (C) 2026 SUSE LLC
//! Human readable analysis output.
use std::fmt::Write;

use console::{style, Term};

use crate::analyze::AnalysisReport;
use crate::size::size_to_human;

const WIDTH_DEFAULT: usize = 80;
const LIST_INDENT: &str = "  ";
const COLUMN_GAP: usize = 2;
const EXPLICIT_TAG: &str = " [explicit]";

/// Where rendered output ends up.
pub trait OutputSink {
    // None if unknown, e.g. when not a terminal
    fn width(&self) -> Option<usize>;
    fn colors(&self) -> bool;
}

pub struct TermSink {
    term: Term,
    colors: bool,
}

impl TermSink {
    pub fn stdout() -> TermSink {
        TermSink {
            term: Term::stdout(),
            colors: console::colors_enabled(),
        }
    }
}

impl OutputSink for TermSink {
    fn width(&self) -> Option<usize> {
        self.term.size_checked().map(|(_rows, cols)| usize::from(cols))
    }

    fn colors(&self) -> bool {
        self.colors
    }
}

/// Sink with fixed properties, for output which isn't a terminal.
pub struct FixedSink {
    pub width: Option<usize>,
    pub colors: bool,
}

impl OutputSink for FixedSink {
    fn width(&self) -> Option<usize> {
        self.width
    }

    fn colors(&self) -> bool {
        self.colors
    }
}

// Lay out @items row by row in equal width columns fitting @width.
fn columns(items: &[String], width: usize) -> Vec<String> {
    let colw = match items.iter().map(|i| i.chars().count()).max() {
        Some(w) => w + COLUMN_GAP,
        None => return vec![],
    };
    let avail = width.saturating_sub(LIST_INDENT.len());
    let ncols = (avail / colw).max(1);

    items
        .chunks(ncols)
        .map(|row| {
            let mut line = String::from(LIST_INDENT);
            for (i, item) in row.iter().enumerate() {
                if i + 1 == row.len() {
                    line.push_str(item);
                } else {
                    let _ = write!(line, "{:<w$}", item, w = colw);
                }
            }
            line
        })
        .collect()
}

struct Renderer {
    out: String,
    width: usize,
    colors: bool,
}

impl Renderer {
    fn msg(&mut self, text: &str) {
        let _ = writeln!(
            self.out,
            "{} {}",
            style("==>").green().bold().force_styling(self.colors),
            style(text).bold().force_styling(self.colors)
        );
    }

    fn msg2(&mut self, text: &str) {
        let _ = writeln!(
            self.out,
            "  {} {}",
            style("->").blue().bold().force_styling(self.colors),
            style(text).bold().force_styling(self.colors)
        );
    }

    // heading plus wrapped list, skipped when empty
    fn section(&mut self, heading: &str, items: &[String]) {
        if items.is_empty() {
            return;
        }
        self.out.push('\n');
        self.msg(heading);
        for line in columns(items, self.width) {
            self.out.push_str(&line);
            self.out.push('\n');
        }
    }
}

/// Render @report for display on @sink. Module and binary lists are
/// sorted, hooks keep their run order.
pub fn render(report: &AnalysisReport, sink: &dyn OutputSink) -> String {
    let mut r = Renderer {
        out: String::new(),
        width: sink.width().unwrap_or(WIDTH_DEFAULT),
        colors: sink.colors(),
    };
    let image = &report.image;
    let build = &report.build;

    match &image.target {
        Some(t) => r.msg(&format!("Image: {} -> {}", image.path.display(), t.display())),
        None => r.msg(&format!("Image: {}", image.path.display())),
    }
    if let Some(v) = &build.version {
        r.msg(&format!("Created with mkinitcpio {}", v));
    }
    r.msg(&format!(
        "Kernel: {}",
        build.kernel_version.as_deref().unwrap_or("unknown")
    ));
    r.msg(&format!("Size: {}", size_to_human(image.size)));
    if report.early_cpio {
        r.msg("Early CPIO: yes");
    }
    match &report.compression {
        Some(c) => {
            r.msg(&format!("Compressed with: {}", report.codec));
            r.msg2(&format!(
                "Uncompressed size: {} ({:.3} ratio)",
                size_to_human(c.uncompressed_size),
                c.ratio
            ));
        }
        None => r.msg("Compressed with: none"),
    }
    r.msg2(&format!(
        "Estimated extraction time: {:.3}s",
        report.extraction_time.as_secs_f64()
    ));

    let mut modules: Vec<String> = build
        .modules
        .iter()
        .map(|m| match build.is_explicit(m) {
            true => format!("{}{}", m, EXPLICIT_TAG),
            false => m.clone(),
        })
        .collect();
    modules.sort();
    r.section("Included modules:", &modules);

    let mut binaries = build.binaries.clone();
    binaries.sort();
    r.section("Included binaries:", &binaries);

    let hooks = &build.hooks;
    if hooks.is_empty() {
        let mut files = build.hook_files.clone();
        files.sort();
        r.section("Included hooks:", &files);
    } else {
        r.section("Early hook run order:", &hooks.early);
        r.section("Hook run order:", &hooks.main);
        r.section("Late hook run order:", &hooks.late);
        r.section("Cleanup hook run order:", &hooks.cleanup);
    }

    r.out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::CompressionStats;
    use crate::buildconf::{BuildConfig, HookGroups};
    use crate::detect::{CompressionCodec, ImageHandle};
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use std::time::Duration;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn report() -> AnalysisReport {
        AnalysisReport {
            image: ImageHandle {
                path: PathBuf::from("/boot/initramfs-linux.img"),
                target: None,
                size: 1536,
            },
            codec: CompressionCodec::Zstd,
            early_cpio: false,
            compression: Some(CompressionStats {
                uncompressed_size: 4096,
                ratio: 0.375,
            }),
            extraction_time: Duration::from_millis(42),
            build: BuildConfig {
                version: Some("38".to_string()),
                kernel_version: Some("6.6.1-arch1-1".to_string()),
                modules: strings(&["usb-storage", "ext4", "nvme-core"]),
                explicit_modules: BTreeSet::from(["ext4".to_string(), "nvme_core".to_string()]),
                binaries: strings(&["sh", "busybox"]),
                hooks: HookGroups {
                    early: vec![],
                    main: strings(&["base", "udev", "autodetect"]),
                    late: vec![],
                    cleanup: strings(&["udev"]),
                },
                hook_files: strings(&["udev"]),
            },
        }
    }

    const PLAIN: FixedSink = FixedSink {
        width: Some(80),
        colors: false,
    };

    #[test]
    fn test_columns() {
        let items = strings(&["aaaa", "bb", "c", "dddddd", "e"]);
        // column width 8, two columns fit in 20 - 2
        assert_eq!(
            columns(&items, 20),
            ["  aaaa    bb", "  c       dddddd", "  e"]
        );
        // at least one column
        assert_eq!(columns(&items[..2], 3), ["  aaaa", "  bb"]);
        assert!(columns(&[], 80).is_empty());
    }

    #[test]
    fn test_render() {
        let out = render(&report(), &PLAIN);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "==> Image: /boot/initramfs-linux.img");
        assert_eq!(lines[1], "==> Created with mkinitcpio 38");
        assert_eq!(lines[2], "==> Kernel: 6.6.1-arch1-1");
        assert_eq!(lines[3], "==> Size: 1.5 KiB");
        assert_eq!(lines[4], "==> Compressed with: zstd");
        assert_eq!(lines[5], "  -> Uncompressed size: 4 KiB (0.375 ratio)");
        assert_eq!(lines[6], "  -> Estimated extraction time: 0.042s");
        // explicit modules tagged and sorted
        assert!(out.contains(
            "==> Included modules:\n  ext4 [explicit]       nvme-core [explicit]  usb-storage\n"
        ));
        assert!(out.contains("==> Included binaries:\n  busybox  sh\n"));
        // run order, not sorted
        assert!(out.contains("==> Hook run order:\n  base        udev        autodetect\n"));
        assert!(out.contains("==> Cleanup hook run order:\n  udev\n"));
        // empty groups omitted
        assert!(!out.contains("Early hook"));
        assert!(!out.contains("Late hook"));
        assert!(!out.contains("Included hooks"));
        assert!(!out.contains('\x1b'));
    }

    #[test]
    fn test_render_degraded() {
        let mut rep = report();
        rep.image.target = Some(PathBuf::from("/boot/real.img"));
        rep.codec = CompressionCodec::None;
        rep.compression = None;
        rep.early_cpio = true;
        rep.build.version = None;
        rep.build.kernel_version = None;
        rep.build.binaries.clear();
        rep.build.hooks = HookGroups::default();
        let out = render(&rep, &PLAIN);

        assert!(out.starts_with("==> Image: /boot/initramfs-linux.img -> /boot/real.img\n"));
        assert!(!out.contains("Created with"));
        assert!(out.contains("==> Kernel: unknown\n"));
        assert!(out.contains("==> Early CPIO: yes\n"));
        assert!(out.contains("==> Compressed with: none\n"));
        assert!(!out.contains("Uncompressed size"));
        assert!(!out.contains("Included binaries"));
        assert!(out.contains("==> Included hooks:\n  udev\n"));
    }

    #[test]
    fn test_render_narrow() {
        let sink = FixedSink {
            width: Some(10),
            colors: false,
        };
        let out = render(&report(), &sink);
        assert!(out.contains("==> Included modules:\n  ext4 [explicit]\n  nvme-core [explicit]\n  usb-storage\n"));
    }

    #[test]
    fn test_render_colors() {
        let sink = FixedSink {
            width: None,
            colors: true,
        };
        let out = render(&report(), &sink);
        assert!(out.contains('\x1b'));
    }
}
