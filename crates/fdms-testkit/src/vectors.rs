//! Golden vectors for the canonical codec.
//!
//! Every implementation of the protocol, device or server, must produce
//! these exact bytes and digests. A change in field order, rounding or
//! case breaks day-end hash agreement in the field, so the expected
//! values are pinned here as literals.

use rust_decimal_macros::dec;

use fdms_core::{
    canonical, FiscalCounter, FiscalCounterType, MoneyType, Payment, PrintForm, Receipt,
    ReceiptLine, ReceiptLineType, ReceiptTax, ReceiptType, Sha256Hash, SignatureData,
};

/// A single golden vector: inputs plus the expected canonical bytes and
/// SHA-256 digest.
pub struct GoldenVector {
    pub name: &'static str,
    pub description: &'static str,
    /// The canonical bytes the codec must produce.
    pub canonical: Vec<u8>,
    /// Hex SHA-256 of the canonical bytes.
    pub sha256_hex: &'static str,
}

fn base_receipt() -> Receipt {
    Receipt {
        device_id: 1001,
        receipt_type: ReceiptType::FiscalInvoice,
        currency: "USD".into(),
        receipt_counter: 1,
        receipt_global_no: 1,
        invoice_no: "INV-0001".into(),
        buyer: None,
        notes: None,
        receipt_date: "2026-03-02T09:15:00".parse().unwrap(),
        credit_debit_ref: None,
        lines_tax_inclusive: true,
        lines: vec![ReceiptLine {
            line_type: ReceiptLineType::Sale,
            line_no: 1,
            hs_code: Some("8471".into()),
            line_name: "Widget".into(),
            line_price: Some(dec!(100.00)),
            line_quantity: dec!(1),
            line_total: dec!(100.00),
            tax_code: Some("A".into()),
            tax_percent: Some(dec!(15)),
            tax_id: 1,
        }],
        taxes: vec![ReceiptTax {
            tax_code: Some("A".into()),
            tax_percent: Some(dec!(15)),
            tax_id: 1,
            tax_amount: dec!(13.04),
            sales_amount_with_tax: dec!(100.00),
        }],
        payments: vec![Payment {
            money_type_code: MoneyType::Cash,
            payment_amount: dec!(100.00),
        }],
        receipt_total: dec!(100.00),
        print_form: PrintForm::Receipt48,
        device_signature: SignatureData {
            hash: Sha256Hash::from_bytes([0u8; 32]),
            signature: vec![],
        },
    }
}

fn day_counters() -> Vec<FiscalCounter> {
    vec![
        FiscalCounter {
            counter_type: FiscalCounterType::SaleByTax,
            currency: "USD".into(),
            tax_id: Some(1),
            tax_percent: Some(dec!(15)),
            money_type: None,
            value: dec!(100.00),
        },
        FiscalCounter {
            counter_type: FiscalCounterType::SaleTaxByTax,
            currency: "USD".into(),
            tax_id: Some(1),
            tax_percent: Some(dec!(15)),
            money_type: None,
            value: dec!(13.04),
        },
        FiscalCounter {
            counter_type: FiscalCounterType::BalanceByMoneyType,
            currency: "USD".into(),
            tax_id: None,
            tax_percent: None,
            money_type: Some(MoneyType::Cash),
            value: dec!(100.00),
        },
    ]
}

/// Build all golden vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    let first = base_receipt();
    let first_bytes = canonical::receipt_bytes(&first, None).expect("encode first receipt");
    let first_hash = Sha256Hash::hash(&first_bytes);

    let mut second = base_receipt();
    second.receipt_counter = 2;
    second.receipt_global_no = 2;
    second.invoice_no = "INV-0002".into();
    let second_bytes = canonical::receipt_bytes(&second, Some(first_hash.as_bytes()))
        .expect("encode second receipt");

    let day_bytes = canonical::day_device_bytes(
        1001,
        1,
        "2026-03-02".parse().unwrap(),
        &day_counters(),
    )
    .expect("encode day");

    let mut credit = base_receipt();
    credit.receipt_type = ReceiptType::CreditNote;
    credit.receipt_counter = 3;
    credit.receipt_global_no = 3;
    credit.invoice_no = "CN-0001".into();
    credit.receipt_date = "2026-03-02T11:00:00".parse().unwrap();
    credit.receipt_total = dec!(-50.00);
    credit.taxes = vec![ReceiptTax {
        tax_code: Some("A".into()),
        tax_percent: Some(dec!(15)),
        tax_id: 1,
        tax_amount: dec!(-6.52),
        sales_amount_with_tax: dec!(-50.00),
    }];
    let credit_bytes = canonical::receipt_bytes(&credit, None).expect("encode credit note");

    vec![
        GoldenVector {
            name: "first_receipt",
            description: "First receipt of a day: no previous hash appended",
            canonical: first_bytes,
            sha256_hex: "3acced58c7597dcc85d2994a3024d045c4e1318940f79db2b71a500011916a99",
        },
        GoldenVector {
            name: "chained_receipt",
            description: "Second receipt: previous hash appended raw",
            canonical: second_bytes,
            sha256_hex: "e6409adedccb1d2b6f21d7aff3caad1f022fb8a59f653f8b5b837796a925cd9d",
        },
        GoldenVector {
            name: "fiscal_day_device",
            description: "Device-side fiscal day encoding with sorted counters",
            canonical: day_bytes,
            sha256_hex: "f447bd2002aea352e43b9651b10c50171bec6a26f487744b5ac1dee204fbfe85",
        },
        GoldenVector {
            name: "credit_note",
            description: "Credit note: negative amounts as signed cents",
            canonical: credit_bytes,
            sha256_hex: "a75af7b98df0345ccd6a174f3c063eca9cd9621ee3e87bac9990e6a5d77813b5",
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectors_hash_to_expected_digests() {
        for vector in all_vectors() {
            let digest = Sha256Hash::hash(&vector.canonical);
            assert_eq!(
                digest.to_hex(),
                vector.sha256_hex,
                "digest mismatch for {}",
                vector.name
            );
        }
    }

    #[test]
    fn first_receipt_canonical_text() {
        let vectors = all_vectors();
        assert_eq!(
            vectors[0].canonical,
            b"1001FISCALINVOICEUSD12026-03-02T09:15:0010000A15.00130410000".to_vec()
        );
    }

    #[test]
    fn chained_receipt_appends_exactly_32_bytes() {
        let vectors = all_vectors();
        let text_len = b"1001FISCALINVOICEUSD22026-03-02T09:15:0010000A15.00130410000".len();
        assert_eq!(vectors[1].canonical.len(), text_len + 32);
    }

    #[test]
    fn credit_note_uses_signed_cents() {
        let vectors = all_vectors();
        let text = String::from_utf8(vectors[3].canonical.clone()).unwrap();
        assert_eq!(
            text,
            "1001CREDITNOTEUSD32026-03-02T11:00:00-5000A15.00-652-5000"
        );
    }

    #[test]
    fn vectors_are_deterministic() {
        let a = all_vectors();
        let b = all_vectors();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.canonical, y.canonical, "mismatch for {}", x.name);
        }
    }
}
