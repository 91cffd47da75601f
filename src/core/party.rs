string_id!(
    /// Identifier of a party holding trade legs in the portfolio.
    ///
    /// Any entity booking trades against counterparties, including the
    /// synthetic hub that absorbs residuals. Names are free-form and never
    /// split into composite keys, so underscores and dashes are safe.
    ///
    /// # Examples
    ///
    /// ```
    /// use compression_engine::core::party::PartyId;
    ///
    /// let dealer = PartyId::new("DEALER_A");
    /// assert_eq!(dealer.to_string(), "DEALER_A");
    /// assert_ne!(dealer, PartyId::from("HUB"));
    /// ```
    PartyId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_as_bare_string() {
        let party = PartyId::new("BANK_OF_X");
        assert_eq!(serde_json::to_string(&party).unwrap(), "\"BANK_OF_X\"");
        let back: PartyId = serde_json::from_str("\"BANK_OF_X\"").unwrap();
        assert_eq!(back, party);
    }

    #[test]
    fn test_orders_by_name() {
        let mut parties: Vec<PartyId> = ["HUB", "B", "A_2", "A"].into_iter().map(PartyId::from).collect();
        parties.sort();
        let names: Vec<&str> = parties.iter().map(|p| p.as_str()).collect();
        assert_eq!(names, vec!["A", "A_2", "B", "HUB"]);
    }
}
