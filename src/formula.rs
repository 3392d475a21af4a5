use std::fmt;

use ndarray::Array2;

use crate::error::{Result, SurvivalError};
use crate::table::{Column, ObservationTable};

/// additive covariate formula: `bili + age + stage`, or `1` for no covariates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    terms: Vec<String>,
}

/// design matrix built from a formula against a table
#[derive(Debug, Clone)]
pub struct Design {
    pub matrix: Array2<f64>,
    pub column_names: Vec<String>,
    /// for each term, the indices of the design columns it expands to
    pub term_columns: Vec<(String, Vec<usize>)>,
}

impl Formula {
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == "1" {
            return Ok(Self::intercept_only());
        }

        let mut terms: Vec<String> = Vec::new();
        for raw in trimmed.split('+') {
            let term = raw.trim();
            if term.is_empty() {
                return Err(SurvivalError::invalid_formula(text, "empty term"));
            }
            if term == "1" {
                continue; // explicit intercept adds nothing to a cox model
            }
            if term.chars().any(char::is_whitespace) {
                return Err(SurvivalError::invalid_formula(
                    text,
                    format!("term '{}' isn't a column name", term),
                ));
            }
            if terms.iter().any(|t| t == term) {
                return Err(SurvivalError::invalid_formula(
                    text,
                    format!("term '{}' appears twice", term),
                ));
            }
            terms.push(term.to_string());
        }

        Ok(Self { terms })
    }

    pub fn from_terms<S: Into<String>>(terms: impl IntoIterator<Item = S>) -> Self {
        Self {
            terms: terms.into_iter().map(Into::into).collect(),
        }
    }

    pub fn intercept_only() -> Self {
        Self { terms: Vec::new() }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn is_intercept_only(&self) -> bool {
        self.terms.is_empty()
    }

    /// same formula with one term removed
    pub fn without(&self, term: &str) -> Self {
        Self {
            terms: self.terms.iter().filter(|t| *t != term).cloned().collect(),
        }
    }

    /// expand terms into a numeric matrix - categoricals get treatment coding
    /// against their first level, one `term[T.level]` column per other level
    pub fn design(&self, table: &ObservationTable) -> Result<Design> {
        let n = table.n_rows();
        let mut columns: Vec<Vec<f64>> = Vec::new();
        let mut column_names = Vec::new();
        let mut term_columns = Vec::new();

        for term in &self.terms {
            let start = columns.len();
            match table.column(term)? {
                Column::Numeric(values) => {
                    if values.iter().any(|v| !v.is_finite()) {
                        return Err(SurvivalError::invalid_survival_data(format!(
                            "column '{}' has missing or non-finite values",
                            term
                        )));
                    }
                    columns.push(values.clone());
                    column_names.push(term.clone());
                }
                Column::Categorical { codes, levels } => {
                    if codes.iter().any(Option::is_none) {
                        return Err(SurvivalError::invalid_survival_data(format!(
                            "column '{}' has missing values",
                            term
                        )));
                    }
                    for (level_idx, level) in levels.iter().enumerate().skip(1) {
                        columns.push(
                            codes
                                .iter()
                                .map(|c| if *c == Some(level_idx) { 1.0 } else { 0.0 })
                                .collect(),
                        );
                        column_names.push(format!("{}[T.{}]", term, level));
                    }
                }
            }
            term_columns.push((term.clone(), (start..columns.len()).collect()));
        }

        let mut matrix = Array2::zeros((n, columns.len()));
        for (j, col) in columns.iter().enumerate() {
            for (i, &v) in col.iter().enumerate() {
                matrix[[i, j]] = v;
            }
        }

        Ok(Design {
            matrix,
            column_names,
            term_columns,
        })
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            write!(f, "1")
        } else {
            write!(f, "{}", self.terms.join(" + "))
        }
    }
}

impl std::str::FromStr for Formula {
    type Err = SurvivalError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ObservationTable {
        let csv = "futime,status,age,stage,sex\n\
                   10,1,50,1,f\n\
                   20,0,60,2,m\n\
                   30,1,70,3,f\n\
                   40,1,80,2,m\n";
        let mut table = ObservationTable::from_reader(csv.as_bytes()).unwrap();
        table.cast_categorical("stage").unwrap();
        table
    }

    #[test]
    fn test_parse_terms() {
        let f = Formula::parse(" bili +copper+ age ").unwrap();
        assert_eq!(f.terms(), &["bili", "copper", "age"]);
        assert_eq!(f.to_string(), "bili + copper + age");
    }

    #[test]
    fn test_intercept_only() {
        assert!(Formula::parse("1").unwrap().is_intercept_only());
        assert!(Formula::parse("").unwrap().is_intercept_only());
        assert_eq!(Formula::intercept_only().to_string(), "1");
    }

    #[test]
    fn test_bad_formulas() {
        assert!(Formula::parse("a + + b").is_err());
        assert!(Formula::parse("a + a").is_err());
        assert!(Formula::parse("a b").is_err());
    }

    #[test]
    fn test_without() {
        let f = Formula::parse("a + b + c").unwrap();
        assert_eq!(f.without("b").to_string(), "a + c");
        assert_eq!(f.without("zzz"), f);
    }

    #[test]
    fn test_design_treatment_coding() {
        let design = Formula::parse("age + stage + sex").unwrap().design(&table()).unwrap();
        assert_eq!(
            design.column_names,
            vec!["age", "stage[T.2]", "stage[T.3]", "sex[T.m]"]
        );
        assert_eq!(design.matrix.dim(), (4, 4));
        assert_eq!(design.matrix.row(1).to_vec(), vec![60.0, 1.0, 0.0, 1.0]);
        assert_eq!(design.matrix.row(2).to_vec(), vec![70.0, 0.0, 1.0, 0.0]);
        assert_eq!(design.term_columns[1], ("stage".to_string(), vec![1, 2]));
    }

    #[test]
    fn test_design_unknown_term() {
        let err = Formula::parse("copper").unwrap().design(&table());
        assert!(matches!(err, Err(SurvivalError::MissingColumn { .. })));
    }
}
