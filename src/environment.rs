use std::collections::HashMap;
use std::ffi::OsString;

/// Extra environment variables for a launched process.
///
/// The overlay is merged over the harness's own (ambient) environment at
/// launch time; a variable set here wins over the ambient value of the same
/// name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment(HashMap<String, String>);

impl Environment {
    /// Creates an empty overlay.
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Sets a variable in the overlay.
    ///
    /// # Examples
    /// ```
    /// use yarrr_harness::Environment;
    ///
    /// let mut env = Environment::new();
    /// env.set("LUA_PATH", "/usr/share/lua/5.2/?.lua");
    /// assert_eq!(env.get("LUA_PATH").map(String::as_str), Some("/usr/share/lua/5.2/?.lua"));
    /// ```
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style variant of [`Environment::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Merges `other` into this overlay; `other` wins on conflicts.
    pub fn extend(&mut self, other: Environment) {
        self.0.extend(other.0);
    }

    /// Parses a `KEY=VALUE` assignment, as accepted on the command line.
    ///
    /// The value may itself contain `=`; the key may not be empty.
    pub fn parse_assignment(assignment: &str) -> Option<(String, String)> {
        let (key, value) = assignment.split_once('=')?;
        if key.is_empty() {
            return None;
        }
        Some((key.to_string(), value.to_string()))
    }

    /// The full environment a child should receive: the ambient variables of
    /// the current process with this overlay applied on top.
    ///
    /// Ambient values are taken as they are, including ones that are not
    /// valid UTF-8.
    pub fn merged_over_ambient(&self) -> HashMap<OsString, OsString> {
        let mut merged = std::env::vars_os().collect::<HashMap<_, _>>();
        for (key, value) in &self.0 {
            merged.insert(OsString::from(key), OsString::from(value));
        }
        merged
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<HashMap<String, String>> for Environment {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K, V> FromIterator<(K, V)> for Environment
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
