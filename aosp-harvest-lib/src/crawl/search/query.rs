use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// A search request as the service expects it.
///
/// Only the page token changes while a query is being paged through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryConfig {
    query_string: String,
    search_options: SearchOptions,
    snippet_options: SnippetOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[expect(clippy::struct_excessive_bools, reason = "mirrors the service's request schema")]
struct SearchOptions {
    enable_diagnostics: bool,
    exhaustive: bool,
    number_of_context_lines: u32,
    page_size: u32,
    page_token: String,
    path_prefix: String,
    repository_scope: RepositoryScope,
    retrieve_multibranch_results: bool,
    saved_query: String,
    scoring_model: String,
    show_personalized_results: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct RepositoryScope {
    root: RepositoryRoot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryRoot {
    oss_project: String,
    repository_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct SnippetOptions {
    min_snippet_lines_per_file: u32,
    min_snippet_lines_per_page: u32,
    number_of_context_lines: u32,
}

impl QueryConfig {
    /// A first-page query over one repository of one project.
    #[must_use]
    pub fn new(query: impl Into<String>, project: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            query_string: query.into(),
            search_options: SearchOptions {
                enable_diagnostics: false,
                exhaustive: false,
                number_of_context_lines: 0,
                page_size: DEFAULT_PAGE_SIZE,
                page_token: String::new(),
                path_prefix: String::new(),
                repository_scope: RepositoryScope {
                    root: RepositoryRoot {
                        oss_project: project.into(),
                        repository_name: repository.into(),
                    },
                },
                retrieve_multibranch_results: true,
                saved_query: String::new(),
                scoring_model: String::new(),
                show_personalized_results: false,
            },
            snippet_options: SnippetOptions {
                min_snippet_lines_per_file: 0,
                min_snippet_lines_per_page: 0,
                number_of_context_lines: 0,
            },
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.search_options.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.search_options.path_prefix = prefix.into();
        self
    }

    /// The same query positioned at another page.
    #[must_use]
    pub fn with_page_token(mut self, token: impl Into<String>) -> Self {
        self.search_options.page_token = token.into();
        self
    }

    #[must_use]
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    #[must_use]
    pub fn page_token(&self) -> &str {
        &self.search_options.page_token
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    #[serde(default)]
    search_results: Vec<SearchResult>,
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    estimated_result_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResult {
    file_search_result: Option<FileSearchResult>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileSearchResult {
    file_spec: FileSpec,
}

#[derive(Debug, Clone, Deserialize)]
struct FileSpec {
    path: String,
}

impl QueryPage {
    /// Tree-wide paths of the files on this page, in result order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.search_results
            .iter()
            .filter_map(|result| result.file_search_result.as_ref())
            .map(|file| file.file_spec.path.as_str())
    }

    /// Token for the next page. An empty token means there is none.
    #[must_use]
    pub fn next_page_token(&self) -> Option<&str> {
        self.next_page_token.as_deref().filter(|token| !token.is_empty())
    }

    /// The service's current estimate of the total hit count.
    #[must_use]
    pub const fn estimated_total(&self) -> u64 {
        self.estimated_result_count
    }
}

/// The service encodes 64-bit integers as JSON strings; accept either form.
fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(u64),
        Text(String),
    }

    match Count::deserialize(deserializer)? {
        Count::Number(n) => Ok(n),
        Count::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}
