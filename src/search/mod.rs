pub mod keyword_score;
pub mod keywords;
pub mod rerank;
pub mod vector;
