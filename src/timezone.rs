//! Whole-hour UTC offsets accepted by the `tz` parameter.

/// A known offset and the IANA zone handed to the browser as `TZ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimezoneEntry {
    pub offset: i32,
    pub zone: &'static str,
}

const TABLE: &[TimezoneEntry] = &[
    TimezoneEntry { offset: -12, zone: "Etc/GMT+12" },
    TimezoneEntry { offset: -11, zone: "Pacific/Pago_Pago" },
    TimezoneEntry { offset: -10, zone: "Pacific/Honolulu" },
    TimezoneEntry { offset: -9, zone: "America/Anchorage" },
    TimezoneEntry { offset: -8, zone: "America/Los_Angeles" },
    TimezoneEntry { offset: -7, zone: "America/Denver" },
    TimezoneEntry { offset: -6, zone: "America/Chicago" },
    TimezoneEntry { offset: -5, zone: "America/New_York" },
    TimezoneEntry { offset: -4, zone: "America/Halifax" },
    TimezoneEntry { offset: -3, zone: "America/Sao_Paulo" },
    TimezoneEntry { offset: -2, zone: "America/Noronha" },
    TimezoneEntry { offset: -1, zone: "Atlantic/Azores" },
    TimezoneEntry { offset: 0, zone: "Europe/London" },
    TimezoneEntry { offset: 1, zone: "Europe/Berlin" },
    TimezoneEntry { offset: 2, zone: "Europe/Athens" },
    TimezoneEntry { offset: 3, zone: "Europe/Moscow" },
    TimezoneEntry { offset: 4, zone: "Asia/Dubai" },
    TimezoneEntry { offset: 5, zone: "Asia/Karachi" },
    TimezoneEntry { offset: 6, zone: "Asia/Dhaka" },
    TimezoneEntry { offset: 7, zone: "Asia/Bangkok" },
    TimezoneEntry { offset: 8, zone: "Asia/Shanghai" },
    TimezoneEntry { offset: 9, zone: "Asia/Tokyo" },
    TimezoneEntry { offset: 10, zone: "Australia/Sydney" },
    TimezoneEntry { offset: 11, zone: "Pacific/Noumea" },
    TimezoneEntry { offset: 12, zone: "Pacific/Auckland" },
    TimezoneEntry { offset: 13, zone: "Pacific/Tongatapu" },
    TimezoneEntry { offset: 14, zone: "Pacific/Kiritimati" },
];

/// Find the entry for a whole-hour offset.
pub fn lookup(offset: i32) -> Option<TimezoneEntry> {
    TABLE.iter().copied().find(|entry| entry.offset == offset)
}
