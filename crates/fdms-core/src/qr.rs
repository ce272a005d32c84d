//! Receipt verification QR strings.

use chrono::NaiveDate;

/// Build the QR display string for a receipt:
/// `{base}/{deviceID:010}/{DDMMYYYY}/{globalNo:010}/{excerpt}` where the
/// excerpt is the first 16 hex characters of the device signature,
/// uppercased.
pub fn qr_data(
    qr_url_base: &str,
    device_id: u32,
    receipt_date: NaiveDate,
    receipt_global_no: u32,
    device_signature: &[u8],
) -> String {
    format!(
        "{}/{:010}/{}/{:010}/{}",
        qr_url_base.trim_end_matches('/'),
        device_id,
        receipt_date.format("%d%m%Y"),
        receipt_global_no,
        signature_excerpt(device_signature),
    )
}

/// The 16-hex-uppercase excerpt printed on the receipt.
pub fn signature_excerpt(device_signature: &[u8]) -> String {
    let hex = hex::encode_upper(device_signature);
    hex.chars().take(16).collect()
}

/// Group the excerpt as `XXXX-XXXX-XXXX-XXXX` for the printed form.
pub fn format_excerpt_for_display(excerpt: &str) -> String {
    if excerpt.len() != 16 {
        return excerpt.to_string();
    }
    format!(
        "{}-{}-{}-{}",
        &excerpt[0..4],
        &excerpt[4..8],
        &excerpt[8..12],
        &excerpt[12..16]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qr_string_shape() {
        let sig = [0xde, 0xad, 0xbe, 0xef, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        let s = qr_data(
            "https://fdms.example/receipt/",
            1001,
            "2026-03-02".parse().unwrap(),
            7,
            &sig,
        );
        assert_eq!(
            s,
            "https://fdms.example/receipt/0000001001/02032026/0000000007/DEADBEEF01020304"
        );
    }

    #[test]
    fn short_signature_yields_short_excerpt() {
        assert_eq!(signature_excerpt(&[0xab, 0xcd]), "ABCD");
    }

    #[test]
    fn display_grouping() {
        assert_eq!(
            format_excerpt_for_display("DEADBEEF01020304"),
            "DEAD-BEEF-0102-0304"
        );
        assert_eq!(format_excerpt_for_display("ABCD"), "ABCD");
    }
}
