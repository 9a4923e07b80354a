// ============================================
// parse.rs - DISM output parsers
// ============================================
// DISM prints line-oriented "Label : value" reports. Three independent
// scanners turn those into typed records:
//   - image info        (/Get-WimInfo)          -> ImageIndexEntry
//   - mounted images    (/Get-MountedImageInfo) -> MountedImage
//   - installed drivers (/Get-Drivers)          -> DriverDescriptor
//
// All three share the same resilience rules: blank lines skipped,
// whitespace trimmed, labels matched case-insensitively, and garbage
// input yields an EMPTY list rather than an error. "Tool failed" vs
// "tool succeeded with nothing to report" is decided by the exit code,
// never by the parser.
// ============================================

use regex::Regex;

// ============================================
// RECORD TYPES
// ============================================

/// One image descriptor inside a WIM file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageIndexEntry {
    pub index: u32,
    pub name: String,
    pub description: String,
}

/// Health of a live mount as DISM reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountStatus {
    Ok,
    NeedsRemount,
    Invalid,
    Corrupted,
    /// A status string this version doesn't recognize; kept verbatim.
    Other(String),
}

impl MountStatus {
    fn from_label(s: &str) -> MountStatus {
        let lower = s.to_lowercase();
        if lower == "ok" || lower == "normal" {
            MountStatus::Ok
        } else if lower.contains("remount") {
            MountStatus::NeedsRemount
        } else if lower.contains("invalid") {
            MountStatus::Invalid
        } else if lower.contains("corrupt") {
            MountStatus::Corrupted
        } else {
            MountStatus::Other(s.to_string())
        }
    }

    /// True for states the recovery ladder must repair.
    pub fn unhealthy(&self) -> bool {
        matches!(
            self,
            MountStatus::NeedsRemount | MountStatus::Invalid | MountStatus::Corrupted
        )
    }
}

/// One row of the live "what is mounted right now" report.
///
/// This reflects OS-wide state: any privileged process (or a crash of
/// this one) can change it, so it is re-queried before every decision
/// rather than cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedImage {
    pub mount_dir: String,
    pub image_file: String,
    pub image_index: u32,
    pub status: MountStatus,
    /// true = Read/Write, false = Read Only.
    pub read_write: bool,
}

/// One driver package, either found on disk or read from an image.
/// Local scans fill only `path`/`display_name`/`folder`; the
/// installed-image report fills the published fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverDescriptor {
    pub path: String,
    pub display_name: String,
    pub folder: Option<String>,
    pub published_name: String,
    pub original_file_name: String,
    pub class_name: String,
    pub provider: String,
    pub date: String,
    pub version: String,
}

// ============================================
// IMAGE-INFO SCANNER
// ============================================

/// Parse `/Get-WimInfo` output into index entries.
///
/// A new record starts at each `Index : N` line; Name and Description
/// lines populate the current record until the next index or end of
/// input, where the in-progress record is flushed.
pub fn parse_image_info(text: &str) -> Vec<ImageIndexEntry> {
    let re_index = Regex::new(r"(?i)^Index\s*:\s*(\d+)").unwrap();
    let re_name = Regex::new(r"(?i)^Name\s*:\s*(.*)").unwrap();
    let re_desc = Regex::new(r"(?i)^Description\s*:\s*(.*)").unwrap();

    let mut entries = Vec::new();
    let mut current: Option<ImageIndexEntry> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = re_index.captures(line) {
            if let Some(done) = current.take() {
                entries.push(done);
            }
            // A ridiculous index (not fitting u32) starts no record.
            if let Ok(index) = caps[1].parse::<u32>() {
                current = Some(ImageIndexEntry {
                    index,
                    name: String::new(),
                    description: String::new(),
                });
            }
            continue;
        }

        if let Some(entry) = current.as_mut() {
            if let Some(caps) = re_name.captures(line) {
                entry.name = caps[1].trim().to_string();
            } else if let Some(caps) = re_desc.captures(line) {
                entry.description = caps[1].trim().to_string();
            }
        }
    }

    if let Some(done) = current {
        entries.push(done);
    }
    entries
}

// ============================================
// MOUNTED-IMAGE SCANNER
// ============================================

/// Parse `/Get-MountedImageInfo` output into live mount records.
///
/// A record starts at each `Mount Dir` line. The read/write flag is a
/// substring match ("Read/Write" vs "Read Only") anywhere in the
/// record's lines, because DISM has phrased that field differently
/// across builds.
pub fn parse_mounted_images(text: &str) -> Vec<MountedImage> {
    let re_mount_dir = Regex::new(r"(?i)^Mount Dir\s*:\s*(.*)").unwrap();
    let re_image_file = Regex::new(r"(?i)^Image File\s*:\s*(.*)").unwrap();
    let re_image_index = Regex::new(r"(?i)^Image Index\s*:\s*(\d+)").unwrap();
    let re_status = Regex::new(r"(?i)^Status\s*:\s*(.*)").unwrap();

    let mut records = Vec::new();
    let mut current: Option<MountedImage> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = re_mount_dir.captures(line) {
            if let Some(done) = current.take() {
                records.push(done);
            }
            current = Some(MountedImage {
                mount_dir: caps[1].trim().to_string(),
                image_file: String::new(),
                image_index: 0,
                status: MountStatus::Other(String::new()),
                read_write: false,
            });
            continue;
        }

        let Some(record) = current.as_mut() else {
            continue;
        };

        if let Some(caps) = re_image_file.captures(line) {
            record.image_file = caps[1].trim().to_string();
        } else if let Some(caps) = re_image_index.captures(line) {
            record.image_index = caps[1].parse().unwrap_or(0);
        } else if let Some(caps) = re_status.captures(line) {
            record.status = MountStatus::from_label(caps[1].trim());
        } else {
            let lower = line.to_lowercase();
            if lower.contains("read/write") && !lower.ends_with(": no") {
                record.read_write = true;
            } else if lower.contains("read only") {
                record.read_write = false;
            }
        }
    }

    if let Some(done) = current {
        records.push(done);
    }
    records
}

// ============================================
// DRIVER SCANNER
// ============================================

/// Parse `/Get-Drivers` output into driver descriptors.
///
/// A record starts at each `Published Name` line. Each subsequent line
/// is tried against the remaining field labels once, first match wins -
/// different DISM versions vary the exact label spelling and order.
pub fn parse_drivers(text: &str) -> Vec<DriverDescriptor> {
    let re_published = Regex::new(r"(?i)^Published Name\s*:\s*(.*)").unwrap();
    // (label regex, field selector) in the order DISM prints them.
    let fields: Vec<(Regex, fn(&mut DriverDescriptor) -> &mut String)> = vec![
        (
            Regex::new(r"(?i)^Original ?File ?Name\s*:\s*(.*)").unwrap(),
            |d| &mut d.original_file_name,
        ),
        (
            Regex::new(r"(?i)^Class ?Name\s*:\s*(.*)").unwrap(),
            |d| &mut d.class_name,
        ),
        (
            Regex::new(r"(?i)^Provider( Name)?\s*:\s*(.*)").unwrap(),
            |d| &mut d.provider,
        ),
        (Regex::new(r"(?i)^Date\s*:\s*(.*)").unwrap(), |d| &mut d.date),
        (
            Regex::new(r"(?i)^Version\s*:\s*(.*)").unwrap(),
            |d| &mut d.version,
        ),
    ];

    let mut drivers = Vec::new();
    let mut current: Option<DriverDescriptor> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = re_published.captures(line) {
            if let Some(done) = current.take() {
                drivers.push(done);
            }
            let published = caps[1].trim().to_string();
            current = Some(DriverDescriptor {
                display_name: published.clone(),
                published_name: published,
                ..DriverDescriptor::default()
            });
            continue;
        }

        if let Some(driver) = current.as_mut() {
            for (re, select) in &fields {
                if let Some(caps) = re.captures(line) {
                    // The provider regex has an optional inner group, so
                    // always read the last capture.
                    let value = caps
                        .get(caps.len() - 1)
                        .map(|m| m.as_str().trim())
                        .unwrap_or("");
                    *select(driver) = value.to_string();
                    break;
                }
            }
        }
    }

    if let Some(done) = current {
        drivers.push(done);
    }
    drivers
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    const WIMINFO_SAMPLE: &str = "\
Deployment Image Servicing and Management tool
Version: 10.0.22621.1

Details for image : C:\\images\\install.wim

Index : 1
Name : Windows 11 Pro
Description : Windows 11 Pro
Size : 16,456,911,736 bytes

Index : 2
Name : Windows 11 Home
Description : Consumer edition
Size : 16,123,000,000 bytes

Index : 3
Name : Windows 11 Enterprise
Description : Volume edition
Size : 16,900,000,000 bytes

The operation completed successfully.
";

    #[test]
    fn three_index_blocks_parse_in_order() {
        let entries = parse_image_info(WIMINFO_SAMPLE);
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0],
            ImageIndexEntry {
                index: 1,
                name: "Windows 11 Pro".to_string(),
                description: "Windows 11 Pro".to_string(),
            }
        );
        assert_eq!(entries[1].index, 2);
        assert_eq!(entries[1].name, "Windows 11 Home");
        assert_eq!(entries[1].description, "Consumer edition");
        assert_eq!(entries[2].index, 3);
        assert_eq!(entries[2].name, "Windows 11 Enterprise");
    }

    #[test]
    fn trailing_record_is_flushed_and_empty_description_kept() {
        // Final record has no terminator line after it, and one entry
        // has an empty Description value.
        let text = "Index : 1\nName : Core\nDescription : \nIndex : 2\nName : Core N\nDescription : no-media";
        let entries = parse_image_info(text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].index, 1);
        assert_eq!(entries[0].name, "Core");
        assert_eq!(entries[0].description, "");
        assert_eq!(entries[1].index, 2);
        assert_eq!(entries[1].name, "Core N");
        assert_eq!(entries[1].description, "no-media");
    }

    #[test]
    fn degenerate_input_yields_empty_lists() {
        assert!(parse_image_info("").is_empty());
        assert!(parse_image_info("no labels here\njust noise\n\n").is_empty());
        assert!(parse_mounted_images("").is_empty());
        assert!(parse_mounted_images("garbage\n:::\n").is_empty());
        assert!(parse_drivers("").is_empty());
        assert!(parse_drivers("Provider : orphan line before any record").is_empty());
    }

    #[test]
    fn labels_match_case_insensitively() {
        let entries = parse_image_info("INDEX : 4\nname : X\nDESCRIPTION : y");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].index, 4);
        assert_eq!(entries[0].name, "X");
        assert_eq!(entries[0].description, "y");
    }

    const MOUNTED_SAMPLE: &str = "\
Mounted images:

Mount Dir : C:\\mount\\a
Image File : C:\\images\\install.wim
Image Index : 1
Mounted Read/Write : Yes
Status : Ok

Mount Dir : C:\\mount\\b
Image File : C:\\images\\boot.wim
Image Index : 2
Mounted Read/Write : No
Status : Needs Remount

The operation completed successfully.
";

    #[test]
    fn mounted_images_parse_with_status_and_rw() {
        let records = parse_mounted_images(MOUNTED_SAMPLE);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].mount_dir, "C:\\mount\\a");
        assert_eq!(records[0].image_file, "C:\\images\\install.wim");
        assert_eq!(records[0].image_index, 1);
        assert_eq!(records[0].status, MountStatus::Ok);
        assert!(records[0].read_write);

        assert_eq!(records[1].image_index, 2);
        assert_eq!(records[1].status, MountStatus::NeedsRemount);
        assert!(!records[1].read_write);
    }

    #[test]
    fn read_only_phrasing_clears_rw_flag() {
        let text = "Mount Dir : D:\\m\nImage File : D:\\x.wim\nImage Index : 1\nAccess : Read Only\nStatus : Invalid";
        let records = parse_mounted_images(text);
        assert_eq!(records.len(), 1);
        assert!(!records[0].read_write);
        assert_eq!(records[0].status, MountStatus::Invalid);
        assert!(records[0].status.unhealthy());
    }

    #[test]
    fn unknown_status_is_kept_verbatim() {
        let text = "Mount Dir : D:\\m\nStatus : Remount Pending Maybe";
        let records = parse_mounted_images(text);
        // "Remount" substring still maps to NeedsRemount by design.
        assert_eq!(records[0].status, MountStatus::NeedsRemount);

        let text = "Mount Dir : D:\\m\nStatus : Sparkly";
        let records = parse_mounted_images(text);
        assert_eq!(
            records[0].status,
            MountStatus::Other("Sparkly".to_string())
        );
        assert!(!records[0].status.unhealthy());
    }

    const DRIVERS_SAMPLE: &str = "\
Obtaining list of 3rd party drivers from the driver store...

Driver packages listing:

Published Name : oem0.inf
Original File Name : netwtw08.inf
Inbox : No
Class Name : Net
Provider Name : Intel
Date : 1/15/2024
Version : 23.40.0.3

Published Name : oem1.inf
Original File Name : nvlddmkm.inf
Inbox : No
Class Name : Display
Provider Name : NVIDIA
Date : 3/02/2024
Version : 31.0.15.3623

The operation completed successfully.
";

    #[test]
    fn drivers_parse_with_all_fields() {
        let drivers = parse_drivers(DRIVERS_SAMPLE);
        assert_eq!(drivers.len(), 2);
        assert_eq!(drivers[0].published_name, "oem0.inf");
        assert_eq!(drivers[0].original_file_name, "netwtw08.inf");
        assert_eq!(drivers[0].class_name, "Net");
        assert_eq!(drivers[0].provider, "Intel");
        assert_eq!(drivers[0].date, "1/15/2024");
        assert_eq!(drivers[0].version, "23.40.0.3");
        assert_eq!(drivers[1].published_name, "oem1.inf");
        assert_eq!(drivers[1].provider, "NVIDIA");
    }

    #[test]
    fn driver_label_variants_are_tolerated() {
        // Older builds print "Provider" without "Name" and squash
        // "OriginalFileName".
        let text = "Published Name : oem7.inf\nOriginalFileName : foo.inf\nProvider : Contoso";
        let drivers = parse_drivers(text);
        assert_eq!(drivers.len(), 1);
        assert_eq!(drivers[0].original_file_name, "foo.inf");
        assert_eq!(drivers[0].provider, "Contoso");
    }
}
