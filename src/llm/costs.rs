//! Per-model token prices (USD per token).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// (input, output) price per token for a model, matched by prefix.
pub fn model_cost(model: &str) -> Option<(Decimal, Decimal)> {
    let model = model.to_lowercase();
    // Longer prefixes first so "gpt-4o-mini" wins over "gpt-4o".
    let table: [(&str, Decimal, Decimal); 10] = [
        ("claude-opus-4", dec!(0.000015), dec!(0.000075)),
        ("claude-sonnet-4", dec!(0.000003), dec!(0.000015)),
        ("claude-3-7-sonnet", dec!(0.000003), dec!(0.000015)),
        ("claude-3-5-sonnet", dec!(0.000003), dec!(0.000015)),
        ("claude-3-5-haiku", dec!(0.0000008), dec!(0.000004)),
        ("claude-haiku-4", dec!(0.000001), dec!(0.000005)),
        ("gpt-4o-mini", dec!(0.00000015), dec!(0.0000006)),
        ("gpt-4o", dec!(0.0000025), dec!(0.00001)),
        ("gpt-4.1-mini", dec!(0.0000004), dec!(0.0000016)),
        ("gpt-4.1", dec!(0.000002), dec!(0.000008)),
    ];
    table
        .iter()
        .find(|(prefix, _, _)| model.starts_with(prefix))
        .map(|(_, input, output)| (*input, *output))
}

/// Price used when a model is not in the table.
pub fn default_cost() -> (Decimal, Decimal) {
    (dec!(0.000003), dec!(0.000015))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_models() {
        assert_eq!(
            model_cost("claude-sonnet-4-20250514"),
            Some((dec!(0.000003), dec!(0.000015)))
        );
        assert_eq!(
            model_cost("GPT-4o-mini-2024-07-18").map(|c| c.0),
            Some(dec!(0.00000015))
        );
        assert_eq!(model_cost("gpt-4o").map(|c| c.1), Some(dec!(0.00001)));
    }

    #[test]
    fn unknown_model() {
        assert!(model_cost("llama-3").is_none());
        assert_eq!(default_cost().0, dec!(0.000003));
    }
}
