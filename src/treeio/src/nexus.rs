//! Minimal Nexus character-matrix reader: `TAXA`/`CHARACTERS`/`SETS` blocks,
//! population-label inference from taxon names, and diploid-genotype or
//! dominant-marker recoding into [`popgen::BiallelicData`].

use std::collections::HashSet;
use std::path::Path;

use popgen::{BiallelicData, Pattern};

use crate::TreeIoError;

#[derive(Debug, Clone)]
pub struct CharacterMatrix {
    pub taxa: Vec<String>,
    pub nchar: usize,
    rows: Vec<Vec<char>>,
    pub charsets: Vec<(String, usize, usize)>,
}

pub fn read(path: &Path) -> Result<CharacterMatrix, TreeIoError> {
    let text = std::fs::read_to_string(path).map_err(|_| TreeIoError::MissingFile(path.to_path_buf()))?;
    parse(&text).map_err(|reason| TreeIoError::Nexus { path: path.to_path_buf(), reason })
}

fn parse(text: &str) -> Result<CharacterMatrix, String> {
    let blocks = split_blocks(text);

    let mut declared_ntax = None;
    let mut taxlabels = Vec::new();
    let mut nchar = None;
    let mut rows: Vec<(String, String)> = Vec::new();
    let mut charsets = Vec::new();

    for (name, body) in blocks {
        match name.to_uppercase().as_str() {
            "TAXA" => {
                for stmt in split_statements(&body) {
                    let upper = stmt.to_uppercase();
                    if let Some(v) = upper.strip_prefix("DIMENSIONS NTAX=") {
                        declared_ntax = v.trim().parse::<usize>().ok();
                    } else if upper.starts_with("TAXLABELS") {
                        taxlabels = stmt
                            .splitn(2, char::is_whitespace)
                            .nth(1)
                            .unwrap_or("")
                            .split_whitespace()
                            .map(str::to_string)
                            .collect();
                    }
                }
            }
            "CHARACTERS" | "DATA" => {
                for stmt in split_statements(&body) {
                    let upper = stmt.to_uppercase();
                    if let Some(v) = find_keyed(&upper, "NCHAR=") {
                        nchar = v.parse::<usize>().ok();
                    } else if upper.trim_start().starts_with("MATRIX") {
                        let matrix_body = stmt.splitn(2, char::is_whitespace).nth(1).unwrap_or("");
                        for line in matrix_body.lines() {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            let mut parts = line.splitn(2, char::is_whitespace);
                            let taxon = parts.next().unwrap_or("").to_string();
                            let states = parts.next().unwrap_or("").split_whitespace().collect::<String>();
                            if !taxon.is_empty() {
                                rows.push((taxon, states));
                            }
                        }
                    }
                }
            }
            "SETS" => {
                for stmt in split_statements(&body) {
                    let upper = stmt.to_uppercase();
                    if let Some(rest) = upper.strip_prefix("CHARSET") {
                        let Some((label_upper, range)) = rest.trim().split_once('=') else { continue };
                        let label_start = stmt.to_uppercase().find("CHARSET").unwrap() + "CHARSET".len();
                        let label = stmt[label_start..].trim().split('=').next().unwrap_or("").trim().to_string();
                        let _ = label_upper;
                        let range = range.trim().trim_end_matches(';').trim();
                        let Some((start, end)) = range.split_once('-') else { continue };
                        let (Ok(start), Ok(end)) = (start.trim().parse::<usize>(), end.trim().parse::<usize>()) else {
                            continue;
                        };
                        charsets.push((label, start, end));
                    }
                }
            }
            _ => {}
        }
    }

    let nchar = nchar.ok_or_else(|| "CHARACTERS block missing NCHAR".to_string())?;
    if rows.is_empty() {
        return Err("MATRIX statement contained no rows".to_string());
    }

    let mut taxa = Vec::with_capacity(rows.len());
    let mut matrix_rows = Vec::with_capacity(rows.len());
    for (taxon, states) in rows {
        let chars: Vec<char> = states.chars().collect();
        if chars.len() != nchar {
            return Err(format!(
                "character matrix declares {nchar} characters but row for {taxon:?} has {}",
                chars.len()
            ));
        }
        taxa.push(taxon);
        matrix_rows.push(chars);
    }

    if !taxlabels.is_empty() {
        let declared: HashSet<&String> = taxlabels.iter().collect();
        let seen: HashSet<&String> = taxa.iter().collect();
        if declared != seen {
            return Err("TAXLABELS does not match taxa present in MATRIX".to_string());
        }
    }
    if let Some(n) = declared_ntax {
        if n != taxa.len() {
            return Err(format!("TAXA DIMENSIONS declared NTAX={n} but MATRIX has {} rows", taxa.len()));
        }
    }

    Ok(CharacterMatrix { taxa, nchar, rows: matrix_rows, charsets })
}

fn split_blocks(text: &str) -> Vec<(String, String)> {
    let mut blocks = Vec::new();
    let upper = text.to_uppercase();
    let mut search_from = 0usize;
    while let Some(begin_rel) = upper[search_from..].find("BEGIN") {
        let begin_abs = search_from + begin_rel;
        let after_begin = begin_abs + "BEGIN".len();
        let Some(semi_rel) = text[after_begin..].find(';') else { break };
        let name = text[after_begin..after_begin + semi_rel].trim().to_string();
        let body_start = after_begin + semi_rel + 1;
        let Some(end_rel) = upper[body_start..].find("END;") else { break };
        let body = text[body_start..body_start + end_rel].to_string();
        blocks.push((name, body));
        search_from = body_start + end_rel + "END;".len();
    }
    blocks
}

fn split_statements(body: &str) -> Vec<String> {
    body.split(';').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

fn find_keyed(upper_stmt: &str, key: &str) -> Option<String> {
    let idx = upper_stmt.find(key)?;
    let rest = &upper_stmt[idx + key.len()..];
    Some(rest.split_whitespace().next()?.to_string())
}

/// Which population a taxon belongs to, inferred by splitting its label on
/// `delimiter` and keeping either the prefix before the first occurrence, or
/// the suffix after the last, per `label_is_suffix`.
pub fn infer_population(label: &str, delimiter: &str, label_is_suffix: bool) -> Result<String, TreeIoError> {
    if label_is_suffix {
        label
            .rsplit_once(delimiter)
            .map(|(_, suffix)| suffix.to_string())
            .ok_or_else(|| TreeIoError::UnresolvedPopulationLabel {
                label: label.to_string(),
                delimiter: delimiter.to_string(),
            })
    } else {
        label
            .split_once(delimiter)
            .map(|(prefix, _)| prefix.to_string())
            .ok_or_else(|| TreeIoError::UnresolvedPopulationLabel {
                label: label.to_string(),
                delimiter: delimiter.to_string(),
            })
    }
}

/// Aggregate a [`CharacterMatrix`] into per-population biallelic site
/// patterns. `diploid` sets the ploidy contributed by each non-missing
/// genotype call (2 or 1); `dominant` only controls whether the resulting
/// [`BiallelicData`] forbids folding, matching ecoevolity's handling of
/// AFLP-style dominant markers.
pub fn to_biallelic_data(
    matrix: &CharacterMatrix,
    population_of_taxon: &[String],
    diploid: bool,
    dominant: bool,
) -> Result<(BiallelicData, Vec<String>), TreeIoError> {
    let mut population_labels: Vec<String> = Vec::new();
    let mut population_index = std::collections::HashMap::new();
    for label in population_of_taxon {
        if !population_index.contains_key(label) {
            population_index.insert(label.clone(), population_labels.len());
            population_labels.push(label.clone());
        }
    }
    let n_populations = population_labels.len();
    let ploidy: u32 = if diploid { 2 } else { 1 };

    let mut data = BiallelicData::new(n_populations, dominant);
    for site in 0..matrix.nchar {
        let mut red = vec![0u32; n_populations];
        let mut total = vec![0u32; n_populations];
        for (taxon_idx, row) in matrix.rows.iter().enumerate() {
            let symbol = row[site];
            if symbol == '?' || symbol == '-' {
                continue;
            }
            let pop = population_index[&population_of_taxon[taxon_idx]];
            let value = symbol
                .to_digit(10)
                .filter(|v| *v <= ploidy)
                .ok_or_else(|| TreeIoError::UnknownStateSymbol {
                    taxon: matrix.taxa[taxon_idx].clone(),
                    site,
                    symbol,
                })?;
            red[pop] += value;
            total[pop] += ploidy;
        }
        data.add_site(Pattern { red, total })?;
    }
    if !matrix.charsets.is_empty() {
        let ends: Vec<usize> = matrix.charsets.iter().map(|(_, _, end)| *end).collect();
        data.set_locus_end_indices(ends)?;
    }
    Ok((data, population_labels))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIPLOID_NEXUS: &str = r#"
#NEXUS
BEGIN TAXA;
  DIMENSIONS NTAX=4;
  TAXLABELS pop1_a pop1_b pop2_a pop2_b;
END;
BEGIN CHARACTERS;
  DIMENSIONS NCHAR=3;
  FORMAT DATATYPE=STANDARD SYMBOLS="012" MISSING=? GAP=-;
  MATRIX
    pop1_a 012
    pop1_b 101
    pop2_a 220
    pop2_b 201
  ;
END;
"#;

    #[test]
    fn reads_matrix_and_taxlabels() {
        let matrix = parse(DIPLOID_NEXUS).unwrap();
        assert_eq!(matrix.taxa.len(), 4);
        assert_eq!(matrix.nchar, 3);
    }

    #[test]
    fn infers_population_from_prefix() {
        assert_eq!(infer_population("pop1_a", "_", false).unwrap(), "pop1");
        assert_eq!(infer_population("pop1_a", "_", true).unwrap(), "a");
        assert!(infer_population("pop1a", "_", false).is_err());
    }

    #[test]
    fn aggregates_diploid_genotypes_into_populations() {
        let matrix = parse(DIPLOID_NEXUS).unwrap();
        let pops: Vec<String> = matrix
            .taxa
            .iter()
            .map(|t| infer_population(t, "_", false).unwrap())
            .collect();
        let (data, labels) = to_biallelic_data(&matrix, &pops, true, false).unwrap();
        assert_eq!(labels, vec!["pop1".to_string(), "pop2".to_string()]);
        assert_eq!(data.n_patterns(), 3);
        let first = &data.patterns()[0];
        assert_eq!(first.total, vec![4, 4]);
        assert_eq!(first.red, vec![1, 4]);
    }
}
