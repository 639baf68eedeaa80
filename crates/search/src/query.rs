//! The read side of the search store. Term and text clauses run inside
//! tantivy; price and stock predicates are applied to the decoded
//! candidates, which keeps the index schema small at the cost of fetching
//! stored documents for every match.

use crate::index::{PartIndex, SearchError};
use bigdecimal::ToPrimitive;
use models::{Part, SearchRequest, SearchSort};
use tantivy::collector::{DocSetCollector, TopDocs};
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::IndexRecordOption;
use tantivy::{DocAddress, Term};

/// Upper bound on score-ordered candidates considered for one query.
pub const MAX_SCORED_CANDIDATES: usize = 10_000;

impl PartIndex {
    /// Runs a part search against the index, returning one page of results
    /// plus the total match count.
    #[tracing::instrument(skip(self, request), fields(query = %request.query))]
    pub fn search(&self, request: &SearchRequest) -> Result<(Vec<Part>, u64), SearchError> {
        let searcher = self.searcher();
        let (page, limit) = request.clamped();

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        let tokens: Vec<String> = request
            .query
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect();
        for token in &tokens {
            clauses.push((
                Occur::Must,
                Box::new(TermQuery::new(
                    Term::from_field_text(self.fields.search_text, token),
                    IndexRecordOption::WithFreqs,
                )),
            ));
        }
        if let Some(brand) = &request.brand {
            clauses.push((
                Occur::Must,
                Box::new(TermQuery::new(
                    Term::from_field_text(self.fields.brand, &brand.to_lowercase()),
                    IndexRecordOption::Basic,
                )),
            ));
        }
        if let Some(supplier) = &request.supplier {
            clauses.push((
                Occur::Must,
                Box::new(TermQuery::new(
                    Term::from_field_text(self.fields.supplier, &supplier.to_lowercase()),
                    IndexRecordOption::Basic,
                )),
            ));
        }

        // Score order only matters for relevance-sorted text queries; all
        // other shapes enumerate matches and sort on decoded fields.
        let scored = request.sort == SearchSort::Relevance && !tokens.is_empty();
        let addresses: Vec<DocAddress> = if clauses.is_empty() {
            searcher
                .search(&AllQuery, &DocSetCollector)?
                .into_iter()
                .collect()
        } else {
            let query = BooleanQuery::new(clauses);
            if scored {
                searcher
                    .search(&query, &TopDocs::with_limit(MAX_SCORED_CANDIDATES))?
                    .into_iter()
                    .map(|(_score, address)| address)
                    .collect()
            } else {
                searcher
                    .search(&query, &DocSetCollector)?
                    .into_iter()
                    .collect()
            }
        };

        let mut matches: Vec<Part> = Vec::with_capacity(addresses.len().min(1024));
        for address in addresses {
            let part = self.decode(&searcher, address)?;
            if let Some(min) = request.min_price {
                if price_of(&part).map_or(true, |p| p < min) {
                    continue;
                }
            }
            if let Some(max) = request.max_price {
                if price_of(&part).map_or(true, |p| p > max) {
                    continue;
                }
            }
            if request.in_stock && part.quantity == 0 {
                continue;
            }
            matches.push(part);
        }

        match request.sort {
            SearchSort::Relevance => {
                if !scored {
                    matches.sort_by(|a, b| a.part_number.cmp(&b.part_number));
                }
            }
            SearchSort::PriceAsc => matches.sort_by(|a, b| {
                cmp_price(a, b)
            }),
            SearchSort::PriceDesc => matches.sort_by(|a, b| cmp_price(b, a)),
            SearchSort::Newest => {
                matches.sort_by(|a, b| b.last_updated.cmp(&a.last_updated))
            }
        }

        let total = matches.len() as u64;
        let start = (page - 1).saturating_mul(limit).min(matches.len());
        let end = (start + limit).min(matches.len());
        let results = matches.drain(start..end).collect();
        Ok((results, total))
    }

    fn decode(
        &self,
        searcher: &tantivy::Searcher,
        address: DocAddress,
    ) -> Result<Part, SearchError> {
        let doc = searcher.doc(address)?;
        let raw = doc
            .get_first(self.fields.document)
            .and_then(|value| value.as_text())
            .unwrap_or_default();
        Ok(serde_json::from_str(raw)?)
    }
}

fn price_of(part: &Part) -> Option<f64> {
    part.price.as_ref().and_then(|p| p.amount.to_f64())
}

/// Ascending price order with missing prices last.
fn cmp_price(a: &Part, b: &Part) -> std::cmp::Ordering {
    match (price_of(a), price_of(b)) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::index::test::part;
    use models::IntegrationId;
    use pretty_assertions::assert_eq;

    fn seeded_index(dir: &std::path::Path) -> (PartIndex, IntegrationId) {
        let index = PartIndex::open(dir).unwrap();
        let id = IntegrationId::new();
        index
            .index_batch(&[
                part(id, "8471474", "ACME", "HYDRAULIC PUMP", "BOSCH", "2450.00", 15),
                part(id, "8471474", "NORDIC", "HYDRAULIC PUMP HD", "SKF", "3250.00", 5),
                part(id, "3461928", "ACME", "FUEL INJECTOR", "DENSO", "875.00", 0),
            ])
            .unwrap();
        (index, id)
    }

    #[test]
    fn text_queries_match_descriptions_and_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let (index, _) = seeded_index(dir.path());

        let (results, total) = index
            .search(&SearchRequest {
                query: "hydraulic".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(results.len(), 2);

        let (results, total) = index
            .search(&SearchRequest {
                query: "8471474".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 2);
        assert!(results.iter().all(|p| p.part_number == "8471474"));
    }

    #[test]
    fn filters_compose_with_text() {
        let dir = tempfile::tempdir().unwrap();
        let (index, _) = seeded_index(dir.path());

        let (results, total) = index
            .search(&SearchRequest {
                query: "pump".to_string(),
                supplier: Some("nordic".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(results[0].supplier, "NORDIC");

        let (_, total) = index
            .search(&SearchRequest {
                in_stock: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 2);

        let (results, total) = index
            .search(&SearchRequest {
                min_price: Some(1000.0),
                max_price: Some(3000.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(results[0].supplier, "ACME");
    }

    #[test]
    fn price_sorts_order_the_page() {
        let dir = tempfile::tempdir().unwrap();
        let (index, _) = seeded_index(dir.path());

        let (results, _) = index
            .search(&SearchRequest {
                sort: SearchSort::PriceAsc,
                ..Default::default()
            })
            .unwrap();
        let numbers: Vec<_> = results.iter().map(|p| p.part_number.as_str()).collect();
        assert_eq!(numbers, vec!["3461928", "8471474", "8471474"]);

        let (results, _) = index
            .search(&SearchRequest {
                sort: SearchSort::PriceDesc,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results[0].supplier, "NORDIC");
    }

    #[test]
    fn pagination_reports_totals() {
        let dir = tempfile::tempdir().unwrap();
        let (index, _) = seeded_index(dir.path());

        let (results, total) = index
            .search(&SearchRequest {
                limit: 2,
                page: 2,
                sort: SearchSort::PriceAsc,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].supplier, "NORDIC");
    }
}
