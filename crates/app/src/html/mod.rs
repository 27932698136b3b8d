//! Embedded static HTML served by the preview server.

/// Raw feed and overlay side by side, refreshed from the JPEG endpoints.
pub const VIEWER_INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>QR overlay viewer</title>
<style>
  body { margin: 0; background: #111; color: #ddd; font-family: monospace; }
  main { display: flex; gap: 8px; padding: 8px; flex-wrap: wrap; }
  figure { margin: 0; }
  img { display: block; max-width: 48vw; background: #000; }
  pre { padding: 0 8px; white-space: pre-wrap; }
</style>
</head>
<body>
<main>
  <figure><img id="source" alt="camera"><figcaption>camera</figcaption></figure>
  <figure><img src="/stream.mjpg" alt="overlay"><figcaption>overlay</figcaption></figure>
</main>
<pre id="detections"></pre>
<script>
  const source = document.getElementById("source");
  const list = document.getElementById("detections");
  setInterval(() => { source.src = "/source.jpg?t=" + Date.now(); }, 200);
  setInterval(async () => {
    const res = await fetch("/detections");
    if (!res.ok) return;
    const body = await res.json();
    list.textContent = body.detections
      .map(d => (d.decoded || d.data) + (d.confidence != null ? " (" + d.confidence.toFixed(2) + ")" : ""))
      .join("\n");
  }, 500);
</script>
</body>
</html>
"#;
