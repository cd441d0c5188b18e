//! Static catalog of known libraries and their documentation sites.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use url::Url;

use docrelay_shared::{RelayError, Result};

/// `(library key, documentation site)` pairs used as `site:` filters.
const LIBRARIES: &[(&str, &str)] = &[
    ("anaconda", "docs.anaconda.com"),
    ("angular", "angular.io"),
    ("apollo", "www.apollographql.com/docs"),
    ("aws", "docs.aws.amazon.com"),
    ("azure", "docs.microsoft.com/azure"),
    ("bootstrap", "getbootstrap.com"),
    ("c", "en.cppreference.com"),
    ("conda", "docs.conda.io"),
    ("cpp", "en.cppreference.com"),
    ("csharp", "docs.microsoft.com/csharp"),
    ("css", "developer.mozilla.org/css"),
    ("cypress", "docs.cypress.io"),
    ("dash", "dash.plotly.com"),
    ("directx", "docs.microsoft.com/directx"),
    ("django", "docs.djangoproject.com"),
    ("docker", "docs.docker.com"),
    ("dotnet", "docs.microsoft.com/dotnet"),
    ("drupal", "www.drupal.org"),
    ("excel", "support.microsoft.com/excel"),
    ("fastapi", "fastapi.tiangolo.com"),
    ("flask", "flask.palletsprojects.com"),
    ("gatsbyjs", "www.gatsbyjs.com/docs"),
    ("gcp", "cloud.google.com"),
    ("git", "git-scm.com"),
    ("go", "golang.org"),
    ("godot", "docs.godotengine.org"),
    ("gradio", "gradio.app/docs"),
    ("graphql", "graphql.org"),
    ("hadoop", "hadoop.apache.org"),
    ("html", "developer.mozilla.org/html"),
    ("jasmine", "jasmine.github.io"),
    ("java", "docs.oracle.com/javase"),
    ("javascript", "developer.mozilla.org"),
    ("jest", "jestjs.io/docs"),
    ("jquery", "api.jquery.com"),
    ("jupyter", "jupyter.org"),
    ("kotlin", "kotlinlang.org"),
    ("kubernetes", "kubernetes.io"),
    ("laravel", "laravel.com"),
    ("linux", "man7.org"),
    ("matplotlib", "matplotlib.org/stable/contents.html"),
    ("mocha", "mochajs.org"),
    ("mongodb", "docs.mongodb.com"),
    ("mysql", "dev.mysql.com/doc"),
    ("nextjs", "nextjs.org/docs"),
    ("nodejs", "nodejs.org"),
    ("npm", "docs.npmjs.com"),
    ("numpy", "numpy.org/doc"),
    ("nuxtjs", "nuxtjs.org/docs"),
    ("opengl", "www.khronos.org/opengl"),
    ("oracle", "docs.oracle.com/database"),
    ("pandas", "pandas.pydata.org/docs"),
    ("php", "www.php.net"),
    ("pip", "pip.pypa.io"),
    ("plotly", "plotly.com/python"),
    ("postgresql", "www.postgresql.org/docs"),
    ("powerbi", "docs.microsoft.com/power-bi"),
    ("puppeteer", "pptr.dev"),
    ("pytest", "docs.pytest.org"),
    ("python", "docs.python.org"),
    ("pytorch", "pytorch.org"),
    ("rails", "guides.rubyonrails.org"),
    ("react", "reactjs.org"),
    ("redis", "redis.io"),
    ("relay", "relay.dev/docs"),
    ("remix", "remix.run/docs"),
    ("ruby", "ruby-doc.org"),
    ("rust", "doc.rust-lang.org"),
    ("sass", "sass-lang.com"),
    ("scikit-learn", "scikit-learn.org"),
    ("scipy", "docs.scipy.org/doc"),
    ("seaborn", "seaborn.pydata.org"),
    ("selenium", "www.selenium.dev/documentation"),
    ("spark", "spark.apache.org"),
    ("spring", "spring.io"),
    ("sql", "www.w3schools.com/sql"),
    ("sqlite", "www.sqlite.org/docs.html"),
    ("streamlit", "docs.streamlit.io"),
    ("svelte", "svelte.dev/docs"),
    ("swift", "developer.apple.com"),
    ("symfony", "symfony.com"),
    ("tableau", "help.tableau.com"),
    ("tailwind", "tailwindcss.com"),
    ("tensorflow", "www.tensorflow.org"),
    ("typescript", "www.typescriptlang.org"),
    ("unity", "docs.unity3d.com"),
    ("venv", "docs.python.org/3/library/venv.html"),
    ("virtualenv", "virtualenv.pypa.io"),
    ("vite", "vitejs.dev"),
    ("vue", "vuejs.org"),
    ("vuepress", "vuepress.vuejs.org"),
    ("vulkan", "www.khronos.org/vulkan"),
    ("webpack", "webpack.js.org"),
    ("wordpress", "wordpress.org"),
    ("yarn", "yarnpkg.com"),
];

static CATALOG: LazyLock<BTreeMap<&'static str, &'static str>> =
    LazyLock::new(|| LIBRARIES.iter().copied().collect());

/// Documentation site for a library key (case-insensitive).
pub fn lookup(library: &str) -> Option<&'static str> {
    let key = library.trim().to_ascii_lowercase();
    CATALOG.get(key.as_str()).copied()
}

/// All known library keys, sorted.
pub fn libraries() -> Vec<&'static str> {
    CATALOG.keys().copied().collect()
}

pub fn len() -> usize {
    CATALOG.len()
}

/// Turn a user-supplied domain into a `site:` filter.
///
/// Accepts bare hosts (`docs.rs`), hosts with a path (`docs.python.org/3`)
/// and full URLs, from which only the host and port are kept.
pub fn normalize_domain(domain: &str) -> Result<String> {
    let trimmed = domain.trim();
    let invalid = || RelayError::InvalidDomain {
        domain: domain.to_string(),
    };

    if !trimmed.contains('.') {
        return Err(invalid());
    }

    if !trimmed.contains("://") {
        return Ok(trimmed.trim_end_matches('/').to_string());
    }

    let url = Url::parse(trimmed).map_err(|_| invalid())?;
    let host = url.host_str().filter(|h| h.contains('.')).ok_or_else(invalid)?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}
